// Close codes derived from the tungstenite-rs library:
// https://github.com/snapview/tungstenite-rs/blob/42b8797e8b7f39efb7d9322dc8af3e9089db4f7d/src/protocol/frame/coding.rs#L117
//
// Original contributions by:
// Copyright (c) 2017 Alexey Galakhov
// Copyright (c) 2016 Jason Housley
// Licensed under both MIT and Apache 2.0 licenses
//
// Modifications made by:
// Copyright 2023 Divy Srivastava <dj.srivastava23@gmail.com>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// You may obtain a copy of the License at:
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is provided "AS IS", WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. See the License for specific language governing permissions and limitations.

use self::CloseCode::*;

/// Status codes carried in the first two bytes of a close frame.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum CloseCode {
    /// Normal closure; the purpose of the connection has been fulfilled.
    Normal,
    /// The endpoint is going away (server shutdown, device power-down).
    Away,
    /// The peer violated the framing protocol.
    Protocol,
    /// Received a type of data the endpoint cannot accept.
    Unsupported,
    /// No status code was present in the close frame.
    Status,
    /// Text payload was not valid UTF-8.
    Invalid,
    /// Generic policy violation.
    Policy,
    /// Message too large to process.
    Size,
    /// Unexpected server-side condition.
    Error,
    /// Server restarting; reconnect later.
    Restart,
    /// Server overloaded; reconnect later.
    Again,
    #[doc(hidden)]
    Reserved(u16),
    #[doc(hidden)]
    Iana(u16),
    #[doc(hidden)]
    Library(u16),
    #[doc(hidden)]
    Bad(u16),
}

impl CloseCode {
    /// Whether the code may appear on the wire.
    pub fn is_allowed(self) -> bool {
        !matches!(self, Bad(_) | Reserved(_) | Status)
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> CloseCode {
        match code {
            1000 => Normal,
            1001 => Away,
            1002 => Protocol,
            1003 => Unsupported,
            1005 => Status,
            1007 => Invalid,
            1008 => Policy,
            1009 => Size,
            1011 => Error,
            1012 => Restart,
            1013 => Again,
            1..=999 => Bad(code),
            1004..=2999 => Reserved(code),
            3000..=3999 => Iana(code),
            4000..=4999 => Library(code),
            _ => Bad(code),
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> u16 {
        match code {
            Normal => 1000,
            Away => 1001,
            Protocol => 1002,
            Unsupported => 1003,
            Status => 1005,
            Invalid => 1007,
            Policy => 1008,
            Size => 1009,
            Error => 1011,
            Restart => 1012,
            Again => 1013,
            Reserved(code) | Iana(code) | Library(code) | Bad(code) => code,
        }
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", u16::from(*self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes_convert_both_ways() {
        for code in [1000u16, 1001, 1002, 1003, 1005, 1007, 1008, 1009, 1011, 1012, 1013] {
            assert_eq!(u16::from(CloseCode::from(code)), code);
        }
    }

    #[test]
    fn test_ranges() {
        assert_eq!(CloseCode::from(1006), Reserved(1006));
        assert_eq!(CloseCode::from(3001), Iana(3001));
        assert_eq!(CloseCode::from(4100), Library(4100));
        assert_eq!(CloseCode::from(5000), Bad(5000));
        assert!(!CloseCode::from(5000).is_allowed());
        assert!(!Status.is_allowed());
        assert!(Normal.is_allowed());
    }
}
