//! SSHFP host key verification.
//!
//! When `VerifyHostKeyDNS` is enabled and a host presents a key we do not
//! know, its SSHFP records are queried and the key's fingerprint compared
//! against them.

use hickory_resolver::proto::rr::rdata::sshfp::FingerprintType;
use hickory_resolver::proto::rr::{RData, RecordType};
use hickory_resolver::TokioAsyncResolver;
use russh_keys::key::PublicKey;
use russh_keys::PublicKeyBase64;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Returns true when an SSHFP record for `host` matches `key`.
pub async fn verify_host_key_dns(host: &str, key: &PublicKey) -> bool {
    let resolver = match TokioAsyncResolver::tokio_from_system_conf() {
        Ok(resolver) => resolver,
        Err(err) => {
            warn!(error = %err, "Unable to build DNS resolver for SSHFP lookup");
            return false;
        }
    };
    let lookup = match resolver.lookup(host, RecordType::SSHFP).await {
        Ok(lookup) => lookup,
        Err(err) => {
            debug!(host = %host, error = %err, "No SSHFP records");
            return false;
        }
    };

    let blob = key.public_key_bytes();
    let sha1 = Sha1::digest(&blob);
    let sha256 = Sha256::digest(&blob);

    for record in lookup.iter() {
        let RData::SSHFP(sshfp) = record else {
            continue;
        };
        let matched = match sshfp.fingerprint_type() {
            FingerprintType::SHA1 => sshfp.fingerprint() == sha1.as_slice(),
            FingerprintType::SHA256 => sshfp.fingerprint() == sha256.as_slice(),
            _ => false,
        };
        if matched {
            debug!(host = %host, "Host key verified via SSHFP");
            return true;
        }
    }
    false
}
