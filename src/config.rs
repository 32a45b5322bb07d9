// Copyright (c) 2026 Amunchain
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]

//! CLI flag parsing.

use clap::Parser;

fn parse_port(text: &str) -> Result<u16, String> {
    if text.len() < 4 || text.len() > 5 || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("'{text}' is not a 4-5 digit port number"));
    }
    text.parse::<u16>()
        .map_err(|_| format!("'{text}' is out of range for a port number"))
}

/// Command-line configuration for one node.
#[derive(Parser, Debug, Clone)]
#[command(name = "fudnet", version, about = "Peer-to-peer gossip device registry")]
pub struct Config {
    /// Port the HTTP control plane listens on.
    #[arg(short = 'r', long = "request-port", default_value = "8880", value_parser = parse_port)]
    pub request_port: u16,

    /// Port the UDP gossip transport listens on.
    #[arg(short = 'm', long = "message-port", default_value = "8881", value_parser = parse_port)]
    pub message_port: u16,

    /// Directory the sled database is stored in.
    #[arg(long = "data-dir", default_value = "./data/internal/database")]
    pub data_dir: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_defaults() {
        let config = Config::parse_from(["fudnet"]);
        assert_eq!(config.request_port, 8880);
        assert_eq!(config.message_port, 8881);
        assert_eq!(config.data_dir, "./data/internal/database");
    }

    #[test]
    fn parses_overrides() {
        let config = Config::parse_from(["fudnet", "-r", "9090", "-m", "9091"]);
        assert_eq!(config.request_port, 9090);
        assert_eq!(config.message_port, 9091);
    }

    #[test]
    fn rejects_malformed_port() {
        assert!(Config::try_parse_from(["fudnet", "-r", "abc"]).is_err());
        assert!(Config::try_parse_from(["fudnet", "-r", "12"]).is_err());
        assert!(Config::try_parse_from(["fudnet", "-r", "123456"]).is_err());
    }
}
