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

pub mod plain;
pub mod scram;

use std::fmt::{Display, Formatter};

/// The SASL mechanisms this client is able to negotiate, in the order the
/// authenticator offers them to the server.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Mechanism {
    ScramSha512,
    ScramSha256,
    ScramSha1,
    Plain,
}

impl Mechanism {
    pub fn name(&self) -> &'static str {
        match self {
            Mechanism::ScramSha512 => "SCRAM-SHA512",
            Mechanism::ScramSha256 => "SCRAM-SHA256",
            Mechanism::ScramSha1 => "SCRAM-SHA1",
            Mechanism::Plain => "PLAIN",
        }
    }

    /// Picks the strongest mechanism the server advertised in its
    /// `SaslListMechs` response, preferring SCRAM over PLAIN.
    pub fn select_best(server_mechs: &str) -> Option<Mechanism> {
        const PREFERENCE: [Mechanism; 4] = [
            Mechanism::ScramSha512,
            Mechanism::ScramSha256,
            Mechanism::ScramSha1,
            Mechanism::Plain,
        ];

        PREFERENCE
            .into_iter()
            .find(|mech| server_mechs.split(' ').any(|m| m == mech.name()))
    }
}

impl Display for Mechanism {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_scram_sha512_when_offered() {
        let chosen = Mechanism::select_best("PLAIN SCRAM-SHA1 SCRAM-SHA256 SCRAM-SHA512");
        assert_eq!(chosen, Some(Mechanism::ScramSha512));
    }

    #[test]
    fn falls_back_to_plain_when_nothing_else_is_offered() {
        assert_eq!(Mechanism::select_best("PLAIN"), Some(Mechanism::Plain));
        assert_eq!(Mechanism::select_best(""), None);
    }
}
