//! Streaming FASTA reader
//!
//! Yields one [`SequenceRecord`] per `>` header as soon as the next header
//! (or end of input) is reached, so callers can forward records while the rest
//! of the file is still being read.
//!
//! Accepted: IUPAC nucleotide codes, `-` gaps and `*`, case-insensitive.
//! Blank lines and `;` comment lines are skipped. Whitespace inside sequence
//! lines is ignored.

use std::io::BufRead;

use crate::types::SequenceRecord;

/// Malformed FASTA input
#[derive(Debug, thiserror::Error)]
pub enum FastaError {
    /// Sequence data before the first header
    #[error("line {line}: sequence data before the first '>' header")]
    OrphanSequence { line: usize },

    #[error("line {line}: invalid nucleotide '{character}'")]
    InvalidCharacter { line: usize, character: char },

    #[error("failed to read input: {0}")]
    Io(#[from] std::io::Error),
}

const VALID: &[u8] = b"ACGTUNRYSWKMBDHV-*";

struct Pending {
    name: String,
    sequence: String,
}

/// Iterator over the records of a FASTA source
pub struct FastaReader<R> {
    lines: std::io::Lines<R>,
    line_no: usize,
    pending: Option<Pending>,
    next_index: usize,
    failed: bool,
}

impl<R: BufRead> FastaReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
            pending: None,
            next_index: 0,
            failed: false,
        }
    }

    fn emit(&mut self, pending: Pending) -> SequenceRecord {
        let index = self.next_index;
        self.next_index += 1;
        let name = if pending.name.is_empty() {
            format!("Untitled {}", index + 1)
        } else {
            pending.name
        };
        SequenceRecord {
            index,
            name,
            sequence: pending.sequence,
        }
    }

    fn fail(&mut self, err: FastaError) -> Option<Result<SequenceRecord, FastaError>> {
        self.failed = true;
        Some(Err(err))
    }
}

impl<R: BufRead> Iterator for FastaReader<R> {
    type Item = Result<SequenceRecord, FastaError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        loop {
            let line = match self.lines.next() {
                Some(Ok(line)) => line,
                Some(Err(err)) => return self.fail(err.into()),
                None => {
                    let pending = self.pending.take()?;
                    return Some(Ok(self.emit(pending)));
                }
            };
            self.line_no += 1;

            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with(';') {
                continue;
            }

            if let Some(header) = trimmed.strip_prefix('>') {
                let next = Pending {
                    name: header.trim().to_string(),
                    sequence: String::new(),
                };
                if let Some(done) = self.pending.replace(next) {
                    return Some(Ok(self.emit(done)));
                }
                continue;
            }

            let line_no = self.line_no;
            let Some(pending) = self.pending.as_mut() else {
                return self.fail(FastaError::OrphanSequence { line: line_no });
            };

            for c in trimmed.chars().filter(|c| !c.is_whitespace()) {
                let upper = c.to_ascii_uppercase();
                if !upper.is_ascii() || !VALID.contains(&(upper as u8)) {
                    return self.fail(FastaError::InvalidCharacter {
                        line: line_no,
                        character: c,
                    });
                }
                pending.sequence.push(upper);
            }
        }
    }
}

/// Read records from an in-memory FASTA string
pub fn parse_str(input: &str) -> FastaReader<&[u8]> {
    FastaReader::new(input.as_bytes())
}
