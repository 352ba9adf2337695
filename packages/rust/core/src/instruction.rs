//! The instruction protocol shared by planner, executor, and finisher.
//!
//! One instruction per line, space-delimited tokens, no escaping — paths
//! must not contain spaces. Five opcodes exist:
//!
//! ```text
//! cp <src> <dst> [<md5>]        copy a slab byte-for-byte
//! link <dst> <src> <root-index> alias a destination slab to a source slab
//! c2w <src>                     decode a slab to work format
//! oNt                           overlay the accumulated work images
//! w2c <dst>                     re-encode the overlay result to a slab
//! ```
//!
//! Any run of `c2w … oNt w2c …` is one atomic merge transaction and the
//! indivisible unit of retry. [`UnitReader`] groups a line stream into
//! [`WorkUnit`]s with a small state machine; a malformed line or an opcode
//! illegal for the current state is fatal for the whole shard.

use pyramerge_shared::{PyramergeError, Result};

// ---------------------------------------------------------------------------
// Instruction
// ---------------------------------------------------------------------------

/// One line of a todo list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// `cp <src> <dst> [<md5>]`
    Cp {
        src: String,
        dst: String,
        md5: Option<String>,
    },
    /// `link <dst> <src> <root-index>`
    Link {
        dst: String,
        src: String,
        root_index: u32,
    },
    /// `c2w <src>`
    CacheToWork { src: String },
    /// `oNt`
    Overlay,
    /// `w2c <dst>`
    WorkToCache { dst: String },
}

impl Instruction {
    /// Parse one line. A wrong token count for the opcode is a protocol
    /// error.
    pub fn parse(line: &str) -> Result<Self> {
        let tokens: Vec<&str> = line.split(' ').collect();
        let bad = || {
            PyramergeError::protocol(format!(
                "wrong token count for {} instruction: {line}",
                tokens[0]
            ))
        };

        match tokens[0] {
            "cp" => match tokens.len() {
                3 => Ok(Self::Cp {
                    src: tokens[1].to_string(),
                    dst: tokens[2].to_string(),
                    md5: None,
                }),
                4 => Ok(Self::Cp {
                    src: tokens[1].to_string(),
                    dst: tokens[2].to_string(),
                    md5: Some(tokens[3].to_string()),
                }),
                _ => Err(bad()),
            },
            "link" => {
                if tokens.len() != 4 {
                    return Err(bad());
                }
                let root_index = tokens[3].parse().map_err(|_| {
                    PyramergeError::protocol(format!("invalid root index: {line}"))
                })?;
                Ok(Self::Link {
                    dst: tokens[1].to_string(),
                    src: tokens[2].to_string(),
                    root_index,
                })
            }
            "c2w" => {
                if tokens.len() != 2 {
                    return Err(bad());
                }
                Ok(Self::CacheToWork {
                    src: tokens[1].to_string(),
                })
            }
            "oNt" => {
                if tokens.len() != 1 {
                    return Err(bad());
                }
                Ok(Self::Overlay)
            }
            "w2c" => {
                if tokens.len() != 2 {
                    return Err(bad());
                }
                Ok(Self::WorkToCache {
                    dst: tokens[1].to_string(),
                })
            }
            other => Err(PyramergeError::protocol(format!(
                "unknown instruction: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cp {
                src,
                dst,
                md5: Some(md5),
            } => write!(f, "cp {src} {dst} {md5}"),
            Self::Cp { src, dst, md5: None } => write!(f, "cp {src} {dst}"),
            Self::Link {
                dst,
                src,
                root_index,
            } => write!(f, "link {dst} {src} {root_index}"),
            Self::CacheToWork { src } => write!(f, "c2w {src}"),
            Self::Overlay => write!(f, "oNt"),
            Self::WorkToCache { dst } => write!(f, "w2c {dst}"),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkUnit
// ---------------------------------------------------------------------------

/// One atomic merge transaction: decode each input, overlay, re-encode to
/// each output (data slab first, mask slab second when present).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeTransaction {
    /// `c2w` sources in file order (masks follow their data slab).
    pub inputs: Vec<String>,
    /// `w2c` destinations in file order.
    pub outputs: Vec<String>,
}

/// One indivisible unit of shard work with respect to resume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkUnit {
    /// A lone `cp` instruction.
    Copy {
        src: String,
        dst: String,
        md5: Option<String>,
    },
    /// A lone `link` instruction.
    Link {
        dst: String,
        src: String,
        root_index: u32,
    },
    /// A whole `c2w…oNt…w2c…` transaction.
    Merge(MergeTransaction),
}

impl WorkUnit {
    /// Destination path recorded in the checkpoint once the unit completes.
    /// For a merge transaction this is the first `w2c` target (the data
    /// slab).
    pub fn destination(&self) -> &str {
        match self {
            Self::Copy { dst, .. } | Self::Link { dst, .. } => dst,
            Self::Merge(tx) => &tx.outputs[0],
        }
    }
}

impl std::fmt::Display for WorkUnit {
    /// Emit the unit's instruction lines, each newline-terminated.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Copy { src, dst, md5 } => {
                let line = Instruction::Cp {
                    src: src.clone(),
                    dst: dst.clone(),
                    md5: md5.clone(),
                };
                writeln!(f, "{line}")
            }
            Self::Link {
                dst,
                src,
                root_index,
            } => writeln!(f, "link {dst} {src} {root_index}"),
            Self::Merge(tx) => {
                for src in &tx.inputs {
                    writeln!(f, "c2w {src}")?;
                }
                writeln!(f, "oNt")?;
                for dst in &tx.outputs {
                    writeln!(f, "w2c {dst}")?;
                }
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// UnitReader
// ---------------------------------------------------------------------------

/// Reader state: IDLE outside transactions, ACCUMULATING after the first
/// `c2w`, EMITTING after `oNt` until the last `w2c`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    Idle,
    Accumulating,
    Emitting,
}

/// Groups a shard's instruction lines into [`WorkUnit`]s.
pub struct UnitReader<'a> {
    lines: std::iter::Enumerate<std::str::Lines<'a>>,
    pending: Option<Instruction>,
    state: ReaderState,
}

impl<'a> UnitReader<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            lines: text.lines().enumerate(),
            pending: None,
            state: ReaderState::Idle,
        }
    }

    fn next_instruction(&mut self) -> Result<Option<Instruction>> {
        if let Some(pending) = self.pending.take() {
            return Ok(Some(pending));
        }
        for (number, line) in self.lines.by_ref() {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            return Instruction::parse(line)
                .map(Some)
                .map_err(|e| PyramergeError::protocol(format!("line {}: {e}", number + 1)));
        }
        Ok(None)
    }

    /// Read the next work unit, or `None` at end of input.
    pub fn next_unit(&mut self) -> Result<Option<WorkUnit>> {
        let mut inputs: Vec<String> = Vec::new();
        let mut outputs: Vec<String> = Vec::new();

        loop {
            let Some(instruction) = self.next_instruction()? else {
                return match self.state {
                    ReaderState::Idle => Ok(None),
                    ReaderState::Accumulating => Err(PyramergeError::protocol(
                        "unterminated merge transaction: end of input before oNt",
                    )),
                    ReaderState::Emitting => {
                        self.state = ReaderState::Idle;
                        if outputs.is_empty() {
                            Err(PyramergeError::protocol(
                                "merge transaction has no w2c destination",
                            ))
                        } else {
                            Ok(Some(WorkUnit::Merge(MergeTransaction {
                                inputs,
                                outputs,
                            })))
                        }
                    }
                };
            };

            match (self.state, instruction) {
                (ReaderState::Idle, Instruction::Cp { src, dst, md5 }) => {
                    return Ok(Some(WorkUnit::Copy { src, dst, md5 }));
                }
                (ReaderState::Idle, Instruction::Link {
                    dst,
                    src,
                    root_index,
                }) => {
                    return Ok(Some(WorkUnit::Link {
                        dst,
                        src,
                        root_index,
                    }));
                }
                (ReaderState::Idle, Instruction::CacheToWork { src }) => {
                    self.state = ReaderState::Accumulating;
                    inputs.push(src);
                }
                (ReaderState::Idle, other) => {
                    return Err(PyramergeError::protocol(format!(
                        "{other} outside a merge transaction"
                    )));
                }

                (ReaderState::Accumulating, Instruction::CacheToWork { src }) => {
                    inputs.push(src);
                }
                (ReaderState::Accumulating, Instruction::Overlay) => {
                    self.state = ReaderState::Emitting;
                }
                (ReaderState::Accumulating, other) => {
                    return Err(PyramergeError::protocol(format!(
                        "{other} inside a merge transaction before oNt"
                    )));
                }

                (ReaderState::Emitting, Instruction::WorkToCache { dst }) => {
                    outputs.push(dst);
                }
                (ReaderState::Emitting, other) => {
                    // First non-w2c line closes the transaction; reprocess it
                    // as the start of the next unit.
                    if outputs.is_empty() {
                        return Err(PyramergeError::protocol(
                            "merge transaction has no w2c destination",
                        ));
                    }
                    self.pending = Some(other);
                    self.state = ReaderState::Idle;
                    return Ok(Some(WorkUnit::Merge(MergeTransaction {
                        inputs,
                        outputs,
                    })));
                }
            }
        }
    }
}
