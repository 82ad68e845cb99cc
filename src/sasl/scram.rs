/*
 *
 *  * Copyright (c) 2025 Couchbase, Inc.
 *  *
 *  * Licensed under the Apache License, Version 2.0 (the "License");
 *  * you may not use this file except in compliance with the License.
 *  * You may obtain a copy of the License at
 *  *
 *  *    http://www.apache.org/licenses/LICENSE-2.0
 *  *
 *  * Unless required by applicable law or agreed to in writing, software
 *  * distributed under the License is distributed on an "AS IS" BASIS,
 *  * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  * See the License for the specific language governing permissions and
 *  * limitations under the License.
 *
 */

use std::fmt;
use std::marker::PhantomData;
use std::str;

use base64::engine::general_purpose;
use base64::Engine;
use hmac::digest::KeyInit;
use hmac::Mac;
use rand::RngCore;
use sha2::Digest;

use crate::memdx::error::Error as MemdxError;

/// A three-step SCRAM client, generic over the HMAC/hash pair so the same
/// logic drives SCRAM-SHA1, SCRAM-SHA256, and SCRAM-SHA512.
pub struct Client<D: Mac + KeyInit, H: Digest> {
    user: String,
    pass: String,
    client_nonce: Vec<u8>,
    server_nonce: Vec<u8>,
    salted_pass: Vec<u8>,
    auth_msg: Vec<u8>,
    hasher: PhantomData<H>,
    mac: PhantomData<D>,
}

impl<D, H> Client<D, H>
where
    D: Mac + KeyInit,
    H: Digest,
{
    pub fn new(user: String, pass: String) -> Self {
        Client {
            user,
            pass,
            client_nonce: Vec::new(),
            server_nonce: Vec::new(),
            salted_pass: Vec::new(),
            auth_msg: Vec::new(),
            hasher: PhantomData,
            mac: PhantomData,
        }
    }

    /// `n,,n=<user>,r=<client nonce>` — the client-first message.
    pub fn step1(&mut self) -> Result<Vec<u8>, ScramError> {
        if self.client_nonce.is_empty() {
            self.client_nonce = generate_nonce()?;
        }

        self.auth_msg.extend_from_slice(b"n=");
        self.auth_msg.extend_from_slice(self.user.as_bytes());
        self.auth_msg.extend_from_slice(b",r=");
        self.auth_msg.extend_from_slice(&self.client_nonce);

        let mut out = Vec::new();
        out.extend_from_slice(b"n,,");
        out.extend_from_slice(&self.auth_msg);
        Ok(out)
    }

    /// Consumes the server's `r=,s=,i=` message and produces the client's
    /// final message carrying the computed proof.
    pub fn step2(&mut self, input: &[u8]) -> Result<Vec<u8>, ScramError> {
        self.auth_msg.push(b',');
        self.auth_msg.extend_from_slice(input);

        let fields: Vec<&[u8]> = input.split(|&b| b == b',').collect();
        if fields.len() != 3 {
            return Err(ScramError::new(format!(
                "expected 3 fields in first scram server message, got {}",
                fields.len()
            )));
        }
        if !fields[0].starts_with(b"r=") {
            return Err(ScramError::new("server sent an invalid scram nonce"));
        }
        if !fields[1].starts_with(b"s=") {
            return Err(ScramError::new("server sent an invalid scram salt"));
        }
        if !fields[2].starts_with(b"i=") {
            return Err(ScramError::new(
                "server sent an invalid scram iteration count",
            ));
        }

        self.server_nonce = fields[0][2..].to_vec();
        if !self.server_nonce.starts_with(&self.client_nonce) {
            return Err(ScramError::new(
                "server scram nonce is not prefixed by the client nonce",
            ));
        }

        let salt = general_purpose::STANDARD
            .decode(&fields[1][2..])
            .map_err(|e| ScramError::new(format!("cannot decode scram salt: {e}")))?;

        let iter_count = str::from_utf8(&fields[2][2..])
            .map_err(|e| ScramError::new(format!("invalid scram iteration count: {e}")))?
            .parse::<u32>()
            .map_err(|e| ScramError::new(format!("invalid scram iteration count: {e}")))?;
        self.salt_password(&salt, iter_count)?;

        self.auth_msg.extend_from_slice(b",c=biws,r=");
        self.auth_msg.extend_from_slice(&self.server_nonce);

        let mut out = Vec::new();
        out.extend_from_slice(b"c=biws,r=");
        out.extend_from_slice(&self.server_nonce);
        out.extend_from_slice(b",p=");
        out.extend_from_slice(&self.client_proof()?);
        Ok(out)
    }

    /// Verifies the server's final `v=<signature>` message.
    pub fn step3(&mut self, input: &[u8]) -> Result<(), ScramError> {
        let fields: Vec<&[u8]> = input.split(|&b| b == b',').collect();
        let is_verifier = fields.len() == 1 && fields[0].starts_with(b"v=");
        let is_error = fields.len() == 1 && fields[0].starts_with(b"e=");

        if is_error {
            return Err(ScramError::new(format!(
                "scram authentication error: {}",
                String::from_utf8_lossy(&fields[0][2..])
            )));
        }
        if !is_verifier {
            return Err(ScramError::new("unsupported scram final message from server"));
        }

        let server_signature = self.server_signature()?;
        if server_signature != fields[0][2..] {
            return Err(ScramError::new("cannot authenticate scram server signature"));
        }
        Ok(())
    }

    fn salt_password(&mut self, salt: &[u8], iter_count: u32) -> Result<(), ScramError> {
        let mut mac = <D as Mac>::new_from_slice(self.pass.as_bytes())
            .map_err(|e| ScramError::new(e.to_string()))?;
        mac.update(salt);
        mac.update(&[0, 0, 0, 1]);
        let mut ui = mac.finalize().into_bytes().to_vec();
        let mut hi = ui.clone();

        for _ in 1..iter_count {
            let mut mac = <D as Mac>::new_from_slice(self.pass.as_bytes())
                .map_err(|e| ScramError::new(e.to_string()))?;
            mac.update(&ui);
            ui.copy_from_slice(&mac.finalize().into_bytes());
            for (i, b) in ui.iter().enumerate() {
                hi[i] ^= b;
            }
        }
        self.salted_pass = hi;
        Ok(())
    }

    fn server_signature(&self) -> Result<Vec<u8>, ScramError> {
        let mut mac = <D as Mac>::new_from_slice(&self.salted_pass)
            .map_err(|e| ScramError::new(e.to_string()))?;
        mac.update(b"Server Key");
        let server_key = mac.finalize().into_bytes().to_vec();

        let mut mac = <D as Mac>::new_from_slice(&server_key)
            .map_err(|e| ScramError::new(e.to_string()))?;
        mac.update(&self.auth_msg);
        let signature = mac.finalize().into_bytes().to_vec();
        Ok(general_purpose::STANDARD.encode(signature).into_bytes())
    }

    fn client_proof(&self) -> Result<Vec<u8>, ScramError> {
        let mut mac = <D as Mac>::new_from_slice(&self.salted_pass)
            .map_err(|e| ScramError::new(e.to_string()))?;
        mac.update(b"Client Key");
        let client_key = mac.finalize().into_bytes().to_vec();

        let mut hash = H::new();
        hash.update(&client_key);
        let stored_key = hash.finalize();

        let mut mac =
            <D as Mac>::new_from_slice(&stored_key).map_err(|e| ScramError::new(e.to_string()))?;
        mac.update(&self.auth_msg);
        let client_signature = mac.finalize().into_bytes().to_vec();

        let proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(a, b)| a ^ b)
            .collect();
        Ok(general_purpose::STANDARD.encode(proof).into_bytes())
    }
}

fn generate_nonce() -> Result<Vec<u8>, ScramError> {
    const NONCE_LEN: usize = 18;
    let mut buf = [0u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut buf);
    Ok(general_purpose::STANDARD.encode(buf).into_bytes())
}

#[derive(Debug)]
pub struct ScramError {
    message: String,
}

impl ScramError {
    fn new(message: impl Into<String>) -> Self {
        ScramError {
            message: message.into(),
        }
    }
}

impl fmt::Display for ScramError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ScramError {}

impl From<ScramError> for MemdxError {
    fn from(value: ScramError) -> Self {
        MemdxError::new_sasl_error(value.message)
    }
}

#[cfg(test)]
mod tests {
    use hmac::Hmac;
    use sha2::Sha256;

    use super::*;

    #[test]
    fn rejects_a_malformed_server_first_message() {
        let mut client = Client::<Hmac<Sha256>, Sha256>::new("alice".into(), "hunter2".into());
        client.step1().unwrap();
        let err = client.step2(b"garbage-with-no-commas").unwrap_err();
        assert!(err.to_string().contains("expected 3 fields"));
    }

    #[test]
    fn rejects_a_server_nonce_not_prefixed_by_the_client_nonce() {
        let mut client = Client::<Hmac<Sha256>, Sha256>::new("alice".into(), "hunter2".into());
        client.client_nonce = b"abc123".to_vec();
        client.auth_msg.extend_from_slice(b"n=alice,r=abc123");
        let err = client
            .step2(b"r=zzz,s=c2FsdA==,i=4096")
            .unwrap_err();
        assert!(err.to_string().contains("not prefixed"));
    }
}
