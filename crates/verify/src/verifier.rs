// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Signed-step verification.
//!
//! Verification has two halves. The MAC check rebuilds the canonical
//! payload from the signature's self-declared field list and verifies it
//! against the selected key. The consistency check then compares the
//! signed step against the job as delivered, so a backend that tampered
//! with the job after signing cannot smuggle a different command, env,
//! or plugin set past a valid signature.

use crate::canonical::{canonical_json, canonical_plugins, canonical_plugins_from_env};
use crate::keyset::{KeySet, VerificationKey, ALG_HMAC_SHA256};
use hmac::{Hmac, Mac};
use pw_core::{Job, Signature, Step};
use sha2::Sha256;
use std::collections::HashMap;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Job-env key carrying the command the executor will run.
pub const COMMAND_ENV: &str = "BUILDKITE_COMMAND";
/// Job-env key carrying the plugin declaration as a JSON string.
pub const PLUGINS_ENV: &str = "BUILDKITE_PLUGINS";

const ENV_FIELD_PREFIX: &str = "env::";

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("step has no signature, but this agent verifies all jobs")]
    NoSignature,

    #[error("no verification key for this signature: {0}")]
    MissingKey(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("job does not match signed step: {0}")]
    JobMismatch(String),
}

/// A verification pass: either the signature checked out, or the step was
/// unsigned and the agent carries no keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Verified,
    Unsigned,
}

/// Verify `job` against the agent's key set.
///
/// Deterministic: repeated calls on the same inputs return the same
/// outcome.
pub fn verify_job(job: &Job, keys: Option<&KeySet>) -> Result<Outcome, VerifyError> {
    let keys = keys.filter(|k| !k.is_empty());
    let signature = match &job.step.signature {
        None => {
            return match keys {
                Some(_) => Err(VerifyError::NoSignature),
                None => Ok(Outcome::Unsigned),
            };
        }
        Some(sig) => sig,
    };

    let keys = keys.ok_or_else(|| {
        VerifyError::MissingKey("step is signed but no verification keys are configured".into())
    })?;
    let key = select_key(signature, keys)?;

    if signature.algorithm != ALG_HMAC_SHA256 {
        return Err(VerifyError::InvalidSignature(format!(
            "unknown algorithm {}",
            signature.algorithm
        )));
    }
    if signature.algorithm != key.algorithm() {
        return Err(VerifyError::InvalidSignature(format!(
            "signature algorithm {} does not match key algorithm {}",
            signature.algorithm,
            key.algorithm()
        )));
    }
    if signature.signed_fields.is_empty() {
        return Err(VerifyError::InvalidSignature("signed field list is empty".into()));
    }

    let payload = build_payload(
        &signature.algorithm,
        &signature.signed_fields,
        &job.step,
        &job.env,
        job.matrix_permutation.as_ref(),
    )?;
    verify_mac(&payload, &signature.value, key)?;
    check_consistency(job, signature)?;
    Ok(Outcome::Verified)
}

/// Sign `step` the way the verifier expects to find it. Used by pipeline
/// upload tooling and by tests that need a known-good signature.
pub fn sign_step(
    step: &Step,
    job_env: &HashMap<String, String>,
    permutation: Option<&HashMap<String, String>>,
    signed_fields: &[&str],
    key: &VerificationKey,
) -> Result<Signature, VerifyError> {
    let fields: Vec<String> = signed_fields.iter().map(|f| f.to_string()).collect();
    let payload = build_payload(key.algorithm(), &fields, step, job_env, permutation)?;
    let mut mac = new_mac(key)?;
    mac.update(&payload);
    let value = base64_encode(&mac.finalize().into_bytes());
    Ok(Signature {
        algorithm: key.algorithm().to_string(),
        key_id: Some(key.id().to_string()),
        signed_fields: fields,
        value,
    })
}

fn select_key<'k>(signature: &Signature, keys: &'k KeySet) -> Result<&'k VerificationKey, VerifyError> {
    match &signature.key_id {
        Some(kid) => keys
            .get(kid)
            .ok_or_else(|| VerifyError::MissingKey(format!("no key with id {kid}"))),
        None => keys.sole_key().ok_or_else(|| {
            VerifyError::MissingKey("signature names no key id and the key set is ambiguous".into())
        }),
    }
}

fn new_mac(key: &VerificationKey) -> Result<HmacSha256, VerifyError> {
    HmacSha256::new_from_slice(key.secret())
        .map_err(|e| VerifyError::InvalidSignature(format!("unusable key material: {e}")))
}

fn verify_mac(payload: &[u8], value: &str, key: &VerificationKey) -> Result<(), VerifyError> {
    let sig_bytes = base64_decode(value)
        .map_err(|e| VerifyError::InvalidSignature(format!("undecodable signature value: {e}")))?;
    let mut mac = new_mac(key)?;
    mac.update(payload);
    mac.verify_slice(&sig_bytes)
        .map_err(|_| VerifyError::InvalidSignature("signature value does not match".into()))
}

/// Assemble the canonical signed payload.
///
/// Layout: length-prefixed algorithm id, then for each declared field in
/// order, length-prefixed name and length-prefixed canonical value. The
/// length prefixes (4-byte little-endian) make the concatenation
/// unambiguous.
fn build_payload(
    algorithm: &str,
    signed_fields: &[String],
    step: &Step,
    job_env: &HashMap<String, String>,
    permutation: Option<&HashMap<String, String>>,
) -> Result<Vec<u8>, VerifyError> {
    let mut payload = Vec::new();
    length_prefixed(&mut payload, algorithm.as_bytes());
    for field in signed_fields {
        let value = field_value(field, step, job_env, permutation)?;
        length_prefixed(&mut payload, field.as_bytes());
        length_prefixed(&mut payload, &value);
    }
    Ok(payload)
}

fn length_prefixed(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

fn field_value(
    field: &str,
    step: &Step,
    job_env: &HashMap<String, String>,
    permutation: Option<&HashMap<String, String>>,
) -> Result<Vec<u8>, VerifyError> {
    if let Some(name) = field.strip_prefix(ENV_FIELD_PREFIX) {
        return job_env.get(name).map(|v| v.as_bytes().to_vec()).ok_or_else(|| {
            VerifyError::InvalidSignature(format!("signed environment variable {name} missing from job"))
        });
    }
    match field {
        "command" => Ok(step.command.as_bytes().to_vec()),
        "plugins" => Ok(canonical_plugins(step.plugins.as_ref()).into_bytes()),
        "matrix" => {
            let map = permutation.cloned().unwrap_or_default();
            Ok(canonical_json(&map_to_value(&map)).into_bytes())
        }
        "env" => Ok(canonical_json(&map_to_value(&step.env)).into_bytes()),
        other => Err(VerifyError::InvalidSignature(format!("unknown signed field {other}"))),
    }
}

fn map_to_value(map: &HashMap<String, String>) -> serde_json::Value {
    serde_json::Value::Object(
        map.iter().map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone()))).collect(),
    )
}

/// Field-by-field comparison of the signed step against the delivered
/// job, with matrix tokens interpolated before comparing.
fn check_consistency(job: &Job, signature: &Signature) -> Result<(), VerifyError> {
    let permutation = job.matrix_permutation.as_ref();
    let step = &job.step;

    let expected_command = interpolate(&step.command, permutation);
    match job.env.get(COMMAND_ENV) {
        Some(cmd) if *cmd == expected_command => {}
        Some(_) => {
            return Err(VerifyError::JobMismatch(format!("command differs from {COMMAND_ENV}")));
        }
        None => {
            return Err(VerifyError::JobMismatch(format!("{COMMAND_ENV} missing from job environment")));
        }
    }

    for (name, value) in &step.env {
        let expected = interpolate(value, permutation);
        match job.env.get(name) {
            Some(actual) if *actual == expected => {}
            _ => {
                return Err(VerifyError::JobMismatch(format!(
                    "step environment variable {name} differs from job environment"
                )));
            }
        }
    }

    for field in &signature.signed_fields {
        if let Some(name) = field.strip_prefix(ENV_FIELD_PREFIX) {
            if !job.env.contains_key(name) {
                return Err(VerifyError::JobMismatch(format!(
                    "signed environment variable {name} missing from job environment"
                )));
            }
        }
    }

    let step_plugins = step.plugins.as_ref().map(|p| interpolate_value(p, permutation));
    let canonical_step = canonical_plugins(step_plugins.as_ref());
    let canonical_job = canonical_plugins_from_env(job.env.get(PLUGINS_ENV).map(String::as_str))
        .map_err(|e| VerifyError::JobMismatch(format!("{PLUGINS_ENV} is not valid JSON: {e}")))?;
    if canonical_step != canonical_job {
        return Err(VerifyError::JobMismatch(format!("plugins differ from {PLUGINS_ENV}")));
    }

    if let (Some(setup), Some(selection)) = (&step.matrix, permutation) {
        for (dimension, value) in selection {
            match setup.get(dimension) {
                Some(values) if values.contains(value) => {}
                Some(_) => {
                    return Err(VerifyError::JobMismatch(format!(
                        "matrix value {value} is not declared for dimension {dimension}"
                    )));
                }
                None => {
                    return Err(VerifyError::JobMismatch(format!(
                        "matrix dimension {dimension} is not declared by the step"
                    )));
                }
            }
        }
    }

    Ok(())
}

/// Replace `{{matrix.<dimension>}}` tokens with the job's selection.
fn interpolate(s: &str, permutation: Option<&HashMap<String, String>>) -> String {
    let Some(permutation) = permutation else {
        return s.to_string();
    };
    let mut out = s.to_string();
    for (dimension, value) in permutation {
        out = out.replace(&format!("{{{{matrix.{dimension}}}}}"), value);
    }
    out
}

fn interpolate_value(v: &serde_json::Value, permutation: Option<&HashMap<String, String>>) -> serde_json::Value {
    match v {
        serde_json::Value::String(s) => serde_json::Value::String(interpolate(s, permutation)),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(|i| interpolate_value(i, permutation)).collect())
        }
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter().map(|(k, val)| (k.clone(), interpolate_value(val, permutation))).collect(),
        ),
        other => other.clone(),
    }
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    STANDARD.encode(bytes)
}

fn base64_decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    STANDARD.decode(s)
}

#[cfg(test)]
#[path = "verifier_tests.rs"]
mod tests;
