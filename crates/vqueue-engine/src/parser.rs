//! Lowers a whitespace-separated command line into a molecule.
//!
//! Grammar: `priority mode+ atom+` where an atom is
//! `(p|play) file offset?`, `(r|record) file max_silence?` or
//! `(d|dtmf) digits delay?`. Optional numeric parameters are recognised by
//! lookahead: a token beginning with `p`, `r` or `d` starts the next atom
//! instead.

use std::iter::Peekable;
use std::str::SplitWhitespace;

use vqueue_core::config::EngineConfig;
use vqueue_core::error::ParseError;
use vqueue_core::mode::ModeSet;
use vqueue_core::PRIORITY_LEVELS;

use crate::atom::{canonical_digit, Atom, DtmfAtom, PlayAtom, RecordAtom};
use crate::audio::AudioFiles;
use crate::molecule::Molecule;

pub fn parse(
    line: &str,
    files: &dyn AudioFiles,
    config: &EngineConfig,
) -> Result<Molecule, ParseError> {
    let mut tokens = line.split_whitespace().peekable();

    let priority_token = tokens
        .next()
        .ok_or_else(|| ParseError::InvalidPriority("<missing>".to_string()))?;
    let priority: usize = priority_token
        .parse()
        .map_err(|_| ParseError::InvalidPriority(priority_token.to_string()))?;
    if priority >= PRIORITY_LEVELS {
        return Err(ParseError::InvalidPriority(priority_token.to_string()));
    }

    let mut modes = ModeSet::empty();
    let mut saw_mode = false;
    while let Some(mode) = tokens.peek().copied().and_then(ModeSet::from_keyword) {
        modes |= mode;
        saw_mode = true;
        tokens.next();
    }
    if !saw_mode {
        return Err(ParseError::MissingMode);
    }
    if modes.has_conflicting_policy() {
        return Err(ParseError::ConflictingModes);
    }

    let mut atoms = Vec::new();
    while let Some(keyword) = tokens.next() {
        match keyword {
            "p" | "play" => {
                let filename = require_value(&mut tokens, keyword)?;
                let offset_ms = optional_number(&mut tokens)?.unwrap_or(0);
                let length_ms = files
                    .duration_ms(&filename)
                    .map_err(|_| ParseError::BadFile(filename.clone()))?;
                atoms.push(Atom::Play(PlayAtom {
                    filename,
                    offset_ms,
                    length_ms,
                }));
            }
            "r" | "record" => {
                let filename = require_value(&mut tokens, keyword)?;
                let max_silence_ms =
                    optional_number(&mut tokens)?.unwrap_or(config.max_silence_ms);
                atoms.push(Atom::Record(RecordAtom {
                    filename,
                    max_silence_ms,
                    length_ms: 0,
                }));
            }
            "d" | "dtmf" => {
                let raw = require_value(&mut tokens, keyword)?;
                let digits: String = raw
                    .chars()
                    .map(|c| canonical_digit(c).ok_or_else(|| ParseError::InvalidDigits(raw.clone())))
                    .collect::<Result<_, _>>()?;
                let inter_digit_delay_ms =
                    optional_number(&mut tokens)?.unwrap_or(config.inter_digit_delay_ms);
                atoms.push(Atom::Dtmf(DtmfAtom {
                    digits,
                    inter_digit_delay_ms,
                    digit_ms: config.digit_slot_ms(inter_digit_delay_ms),
                    cursor: 0,
                }));
            }
            other => return Err(ParseError::UnknownToken(other.to_string())),
        }
    }

    if atoms.is_empty() {
        return Err(ParseError::EmptyMolecule);
    }
    Ok(Molecule::new(priority as u8, modes, atoms))
}

fn require_value(
    tokens: &mut Peekable<SplitWhitespace<'_>>,
    keyword: &str,
) -> Result<String, ParseError> {
    tokens
        .next()
        .map(str::to_string)
        .ok_or_else(|| ParseError::MissingArgument {
            keyword: keyword.to_string(),
        })
}

/// Consume the next token as a number unless it opens the next atom.
fn optional_number(
    tokens: &mut Peekable<SplitWhitespace<'_>>,
) -> Result<Option<u64>, ParseError> {
    let Some(token) = tokens.peek().copied() else {
        return Ok(None);
    };
    if token.starts_with(['p', 'r', 'd']) {
        return Ok(None);
    }
    let value = token
        .parse()
        .map_err(|_| ParseError::UnknownToken(token.to_string()))?;
    tokens.next();
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use vqueue_core::config::EngineConfig;
    use vqueue_core::error::{AudioError, ParseError};
    use vqueue_core::mode::ModeSet;

    use super::parse;
    use crate::atom::Atom;
    use crate::audio::AudioFiles;

    /// Every `.wav` file exists and is 2000 ms long; everything else fails
    /// to open.
    struct FixedFiles;

    impl AudioFiles for FixedFiles {
        fn duration_ms(&self, filename: &str) -> Result<u64, AudioError> {
            if filename.ends_with(".wav") {
                Ok(2000)
            } else {
                Err(AudioError::Open {
                    path: filename.to_string(),
                    reason: "no such file".to_string(),
                })
            }
        }
    }

    fn config() -> EngineConfig {
        EngineConfig::default()
    }

    #[test]
    fn lowers_a_full_command_line() {
        let m = parse(
            "2 mute loop p hello.wav 250 r reply.wav d 12#",
            &FixedFiles,
            &config(),
        )
        .expect("parse");
        assert_eq!(m.priority, 2);
        assert_eq!(m.modes, ModeSet::MUTE | ModeSet::LOOP);
        assert_eq!(m.atoms.len(), 3);
        match &m.atoms[0] {
            Atom::Play(p) => {
                assert_eq!(p.filename, "hello.wav");
                assert_eq!(p.offset_ms, 250);
                assert_eq!(p.length_ms, 2000);
            }
            other => panic!("unexpected atom {other:?}"),
        }
        match &m.atoms[1] {
            Atom::Record(r) => {
                assert_eq!(r.max_silence_ms, 500);
                assert_eq!(r.length_ms, 0);
            }
            other => panic!("unexpected atom {other:?}"),
        }
        match &m.atoms[2] {
            Atom::Dtmf(d) => {
                assert_eq!(d.digits, "12#");
                assert_eq!(d.inter_digit_delay_ms, 40);
                assert_eq!(d.digit_ms, 140);
            }
            other => panic!("unexpected atom {other:?}"),
        }
    }

    #[test]
    fn long_keywords_are_accepted() {
        let m = parse(
            "0 discard play hello.wav record out.wav dtmf 42",
            &FixedFiles,
            &config(),
        )
        .expect("parse");
        assert_eq!(m.atoms.len(), 3);
    }

    #[test]
    fn lookahead_separates_params_from_atom_keywords() {
        // `p beep.wav` directly follows the record filename: no silence
        // parameter was given.
        let m = parse("0 discard r out.wav p beep.wav 100", &FixedFiles, &config())
            .expect("parse");
        match &m.atoms[0] {
            Atom::Record(r) => assert_eq!(r.max_silence_ms, 500),
            other => panic!("unexpected atom {other:?}"),
        }
        match &m.atoms[1] {
            Atom::Play(p) => assert_eq!(p.offset_ms, 100),
            other => panic!("unexpected atom {other:?}"),
        }
    }

    #[test]
    fn digits_fold_to_upper_case() {
        let m = parse("0 discard d 1a*d", &FixedFiles, &config()).expect("parse");
        match &m.atoms[0] {
            Atom::Dtmf(d) => assert_eq!(d.digits, "1A*D"),
            other => panic!("unexpected atom {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_priority() {
        assert_eq!(
            parse("x discard p a.wav", &FixedFiles, &config()),
            Err(ParseError::InvalidPriority("x".to_string()))
        );
        assert_eq!(
            parse("5 discard p a.wav", &FixedFiles, &config()),
            Err(ParseError::InvalidPriority("5".to_string()))
        );
        assert_eq!(
            parse("", &FixedFiles, &config()),
            Err(ParseError::InvalidPriority("<missing>".to_string()))
        );
    }

    #[test]
    fn rejects_missing_and_conflicting_modes() {
        assert_eq!(
            parse("0 p a.wav", &FixedFiles, &config()),
            Err(ParseError::MissingMode)
        );
        assert_eq!(
            parse("0 pause mute p a.wav", &FixedFiles, &config()),
            Err(ParseError::ConflictingModes)
        );
    }

    #[test]
    fn rejects_empty_molecule_and_unknown_tokens() {
        assert_eq!(
            parse("0 discard", &FixedFiles, &config()),
            Err(ParseError::EmptyMolecule)
        );
        assert_eq!(
            parse("0 discard x a.wav", &FixedFiles, &config()),
            Err(ParseError::UnknownToken("x".to_string()))
        );
        assert_eq!(
            parse("0 discard p a.wav 12q", &FixedFiles, &config()),
            Err(ParseError::UnknownToken("12q".to_string()))
        );
    }

    #[test]
    fn rejects_unopenable_play_file() {
        assert_eq!(
            parse("0 discard p nosuch.raw", &FixedFiles, &config()),
            Err(ParseError::BadFile("nosuch.raw".to_string()))
        );
    }

    #[test]
    fn rejects_bad_digits_and_missing_values() {
        assert_eq!(
            parse("0 discard d 12z9", &FixedFiles, &config()),
            Err(ParseError::InvalidDigits("12z9".to_string()))
        );
        assert_eq!(
            parse("0 discard p", &FixedFiles, &config()),
            Err(ParseError::MissingArgument {
                keyword: "p".to_string()
            })
        );
    }

    #[test]
    fn describe_round_trips() {
        let lines = [
            "0 discard p hello.wav 0",
            "4 dont_interrupt p announce.wav 120 r reply.wav 900",
            "1 restart loop p jingle.wav 0 d 123 40",
            "3 mute dtmf_stop d 19AD 90",
            "2 pause loop r take.wav 250",
        ];
        for line in lines {
            let first = parse(line, &FixedFiles, &config()).expect("first parse");
            let second =
                parse(&first.describe(), &FixedFiles, &config()).expect("second parse");
            assert_eq!(first, second, "round trip of `{line}`");
        }
    }
}
