use std::collections::HashMap;

use anyhow::{Error, anyhow};
use base64::prelude::*;
use digest::{Digest, core_api::BlockSizeUser};
use hmac::{Hmac, Mac};
use rand::RngCore;

/// A fresh client/server nonce component: random bytes, base64-encoded so
/// the result can't contain the `,` SCRAM uses as an attribute separator.
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    BASE64_STANDARD.encode(bytes)
}

pub fn hmac<D>(key: &[u8], data: &[u8]) -> Vec<u8>
where
    D: Digest + BlockSizeUser + digest::FixedOutputReset + Clone,
{
    let mut mac = <Hmac<D> as Mac>::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

pub fn h<D>(data: &[u8]) -> Vec<u8>
where
    D: Digest,
{
    D::digest(data).to_vec()
}

pub fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b.iter()).map(|(x, y)| x ^ y).collect()
}

/// Splits a SCRAM message (`key1=value1,key2=value2,...`) into its
/// attribute map. Values may themselves contain `=` (e.g. base64), so only
/// the first `=` in each field is a separator.
pub fn parse_scram_attrs(message: &str) -> HashMap<char, String> {
    message
        .split(',')
        .filter_map(|field| {
            let mut chars = field.chars();
            let key = chars.next()?;
            let rest = chars.as_str();
            rest.strip_prefix('=').map(|value| (key, value.to_string()))
        })
        .collect()
}

pub fn required_attr(attrs: &HashMap<char, String>, key: char) -> Result<String, Error> {
    attrs
        .get(&key)
        .cloned()
        .ok_or_else(|| anyhow!("SCRAM message missing required attribute `{key}`"))
}
