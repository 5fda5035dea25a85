//! implements a parser for the convoy line protocol.
use std::fmt;

use uuid::Uuid;

use crate::types::job::{JobId, MediaKind, NewJob, Quality};
use crate::types::protocol::Command;
use crate::types::serialisable::WireSerialisable;

/// Longest source reference accepted, in bytes.
pub const MAX_SOURCE_LEN: usize = 200;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ParsingError {
    BadFormat,
    UnknownCommand,
}

impl fmt::Display for ParsingError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::BadFormat => "bad format",
            Self::UnknownCommand => "unknown command",
        })
    }
}

impl std::error::Error for ParsingError {}

impl WireSerialisable for ParsingError {
    fn serialise_wire(&self) -> Vec<u8> {
        match self {
            ParsingError::BadFormat => b"BAD_FORMAT\r\n".to_vec(),
            ParsingError::UnknownCommand => b"UNKNOWN_COMMAND\r\n".to_vec(),
        }
    }
}

/// Whether `source` is acceptable as a source reference: non-empty, at most
/// [`MAX_SOURCE_LEN`] bytes, printable ASCII without spaces.
pub fn is_valid_source(source: &[u8]) -> bool {
    !source.is_empty()
        && source.len() <= MAX_SOURCE_LEN
        && source.iter().all(|c| c.is_ascii_graphic())
}

/// Provides a custom, minimal, zero-copy parser of byte slices.
struct ParseState<'a> {
    from: &'a [u8],
}

impl ParseState<'_> {
    /// Asserts there's no more input to take, returning `result` if so, and a
    /// `BadFormat` error otherwise.
    fn expect_done_and<R>(&self, result: R) -> Result<R, ParsingError> {
        if self.from.is_empty() {
            Ok(result)
        } else {
            Err(ParsingError::BadFormat)
        }
    }

    /// Consumes from the input, expecting a token of non-zero length.
    fn expect_next_token(&mut self) -> Result<&[u8], ParsingError> {
        let token = self.next_token().ok_or(ParsingError::BadFormat)?;

        if token.is_empty() {
            Err(ParsingError::BadFormat)
        } else {
            Ok(token)
        }
    }

    /// Consumes from the input, expecting a space then a u32.
    fn expect_next_u32(&mut self) -> Result<u32, ParsingError> {
        self.expect_space()?;

        let token = self.expect_next_token()?;

        let mut r = 0u32;
        for v in token {
            match v {
                b'0'..=b'9' => {
                    r = r
                        .checked_mul(10)
                        .ok_or(ParsingError::BadFormat)?
                        .checked_add((*v - b'0') as u32)
                        .ok_or(ParsingError::BadFormat)?
                },
                _ => return Err(ParsingError::BadFormat),
            };
        }

        Ok(r)
    }

    /// Consumes from the input, expecting a space then an optionally-signed
    /// i32.
    fn expect_next_i32(&mut self) -> Result<i32, ParsingError> {
        self.expect_space()?;

        let token = self.expect_next_token()?;
        let (negative, digits) = match token.split_first() {
            Some((b'-', rest)) => (true, rest),
            Some((b'+', rest)) => (false, rest),
            _ => (false, token),
        };

        if digits.is_empty() {
            return Err(ParsingError::BadFormat);
        }

        // Accumulate negatively so i32::MIN parses without overflow.
        let mut r = 0i32;
        for v in digits {
            match v {
                b'0'..=b'9' => {
                    r = r
                        .checked_mul(10)
                        .ok_or(ParsingError::BadFormat)?
                        .checked_sub((*v - b'0') as i32)
                        .ok_or(ParsingError::BadFormat)?
                },
                _ => return Err(ParsingError::BadFormat),
            };
        }

        if negative {
            Ok(r)
        } else {
            r.checked_neg().ok_or(ParsingError::BadFormat)
        }
    }

    /// Consumes from the input, expecting a space then a job id.
    fn expect_next_id(&mut self) -> Result<JobId, ParsingError> {
        self.expect_space()?;

        let token = self.expect_next_token()?;
        Uuid::try_parse_ascii(token).map_err(|_| ParsingError::BadFormat)
    }

    /// Consumes from the input, expecting a space then a job description.
    fn expect_next_job(&mut self) -> Result<NewJob, ParsingError> {
        self.expect_space()?;
        self.expect_job()
    }

    /// Consumes `<kind> <quality> <priority> <source>` from the input.
    fn expect_job(&mut self) -> Result<NewJob, ParsingError> {
        let kind = match self.expect_next_token()? {
            b"audio" => MediaKind::Audio,
            b"video" => MediaKind::Video,
            _ => return Err(ParsingError::BadFormat),
        };

        self.expect_space()?;
        let quality = match self.expect_next_token()? {
            b"low" => Quality::Low,
            b"medium" => Quality::Medium,
            b"high" => Quality::High,
            _ => return Err(ParsingError::BadFormat),
        };

        let priority = self.expect_next_i32()?;

        self.expect_space()?;
        let source = self.expect_next_token()?;
        if !is_valid_source(source) {
            return Err(ParsingError::BadFormat);
        }

        Ok(NewJob {
            // is_valid_source only admits ASCII.
            source_ref: String::from_utf8_lossy(source).into_owned(),
            kind,
            quality,
            priority,
        })
    }

    /// Consumes a space.
    fn expect_space(&mut self) -> Result<(), ParsingError> {
        match self.from.first() {
            Some(b' ') => {
                self.from = &self.from[1..];
                Ok(())
            },
            _ => Err(ParsingError::BadFormat),
        }
    }

    /// Consumes from this ParseState until reaching a space byte or the end of
    /// the input. It returns None at the end of the input. On consecutive space
    /// bytes, it returns a zero-length slice.
    fn next_token(&mut self) -> Option<&[u8]> {
        if self.from.is_empty() {
            return None;
        }

        let idx = self
            .from
            .iter()
            .position(|c| *c == b' ')
            .unwrap_or(self.from.len());

        let token = &self.from[..idx];
        self.from = &self.from[idx..];

        Some(token)
    }
}

impl<'a> From<&'a [u8]> for ParseState<'a> {
    fn from(from: &'a [u8]) -> Self {
        ParseState { from }
    }
}

// Parsing is implemented to fulfil the TryFrom trait.
impl TryFrom<&[u8]> for Command {
    type Error = ParsingError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        use Command::*;

        let mut ps: ParseState = value.into();

        let cmd = match ps.expect_next_token()? {
            // <cmd>
            b"quit" => Quit,
            b"stats" => Stats,

            // <cmd> <id>
            b"status" => Status {
                id: ps.expect_next_id()?,
            },

            // <cmd> <count>
            b"convert-batch" => ConvertBatch {
                count: ps.expect_next_u32()?,
            },

            // <cmd> <kind> <quality> <priority> <source>
            b"convert" => Convert(ps.expect_next_job()?),

            _ => return Err(ParsingError::UnknownCommand),
        };

        ps.expect_done_and(cmd)
    }
}

/// Parses one body line of a `convert-batch`:
/// `<kind> <quality> <priority> <source>`.
impl TryFrom<&[u8]> for NewJob {
    type Error = ParsingError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let mut ps: ParseState = value.into();
        let job = ps.expect_job()?;
        ps.expect_done_and(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        use Command::*;
        use ParsingError::*;

        const U32_MAX_PLUS_1: u64 = 1 << 32;

        // Asserts the line parses into the given command successfully.
        #[track_caller]
        fn ok(line: &[u8], res: Command) {
            assert_eq!(line.try_into(), Ok(res));
        }

        // Asserts the line fails to parse with a BadFormat error.
        #[track_caller]
        fn bf(line: &[u8]) {
            assert_eq!(TryInto::<Command>::try_into(line), Err(BadFormat));
        }

        // Asserts the line fails to parse with an UnknownCommand error.
        #[track_caller]
        fn uc(line: &[u8]) {
            assert_eq!(
                TryInto::<Command>::try_into(line),
                Err(UnknownCommand)
            );
        }

        let source_200_bytes: String = (0..200).map(|_| 'a').collect();
        let source_201_bytes: String = (0..201).map(|_| 'a').collect();

        // Check silly non-commands
        bf(b"");
        bf(b" ");
        uc(b"syntax-error");
        uc(b"put 0 0 0 0");

        ok(b"quit", Quit);
        ok(b"stats", Stats);
        bf(b"stats ");

        ok(
            b"convert audio medium 0 dQw4w9WgXcQ",
            Convert(NewJob {
                source_ref: "dQw4w9WgXcQ".into(),
                kind: MediaKind::Audio,
                quality: Quality::Medium,
                priority: 0,
            }),
        );
        ok(
            b"convert video high -7 https://example.com/v?id=1&t=2",
            Convert(NewJob {
                source_ref: "https://example.com/v?id=1&t=2".into(),
                kind: MediaKind::Video,
                quality: Quality::High,
                priority: -7,
            }),
        );
        ok(
            b"convert video low +3 x",
            Convert(NewJob {
                source_ref: "x".into(),
                kind: MediaKind::Video,
                quality: Quality::Low,
                priority: 3,
            }),
        );
        ok(
            format!("convert audio low 0 {source_200_bytes}").as_bytes(),
            Convert(NewJob {
                source_ref: source_200_bytes,
                kind: MediaKind::Audio,
                quality: Quality::Low,
                priority: 0,
            }),
        );
        bf(format!("convert audio low 0 {source_201_bytes}").as_bytes());
        bf(b"convert audio medium 0");
        bf(b"convert audio medium 0 ");
        bf(b"convert audio medium 0 a b");
        bf(b"convert audio  medium 0 a");
        bf(b"convert podcast medium 0 a");
        bf(b"convert audio ultra 0 a");
        bf(b"convert audio low - a");
        bf(b"convert audio low 1x a");
        bf(b"convert audio low 2147483648 a");
        bf(b"convert audio low 0 caf\xc3\xa9");
        ok(
            b"convert audio low -2147483648 a",
            Convert(NewJob {
                source_ref: "a".into(),
                kind: MediaKind::Audio,
                quality: Quality::Low,
                priority: i32::MIN,
            }),
        );

        ok(b"convert-batch 25", ConvertBatch { count: 25 });
        bf(b"convert-batch");
        bf(b"convert-batch -1");
        bf(format!("convert-batch {U32_MAX_PLUS_1}").as_bytes());

        ok(
            b"status 67e55044-10b1-426f-9247-bb680e5fe0c8",
            Status {
                id: "67e55044-10b1-426f-9247-bb680e5fe0c8".parse().unwrap(),
            },
        );
        bf(b"status");
        bf(b"status 42");
        bf(b"status 67e55044-10b1-426f-9247-bb680e5fe0c8 extra");
    }

    #[test]
    fn test_parse_batch_line() {
        assert_eq!(
            NewJob::try_from(&b"video medium 5 abc"[..]),
            Ok(NewJob {
                source_ref: "abc".into(),
                kind: MediaKind::Video,
                quality: Quality::Medium,
                priority: 5,
            })
        );
        assert_eq!(
            NewJob::try_from(&b" video medium 5 abc"[..]),
            Err(ParsingError::BadFormat)
        );
        assert_eq!(
            NewJob::try_from(&b"convert video medium 5 abc"[..]),
            Err(ParsingError::BadFormat)
        );
    }

    #[test]
    fn test_error_replies() {
        let reply = |line: &[u8]| {
            Command::try_from(line).unwrap_err().serialise_wire()
        };

        assert_eq!(reply(b"reserve"), b"UNKNOWN_COMMAND\r\n");
        assert_eq!(reply(b"convert audio"), b"BAD_FORMAT\r\n");
    }
}
