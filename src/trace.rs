use std::{
    collections::VecDeque,
    fs,
    io::{self, BufRead, BufReader, Read},
    mem,
    num::IntErrorKind,
    path::PathBuf,
    thread::{self, JoinHandle},
};

use crossbeam::channel::{Receiver, Sender};
use xz2::read::XzDecoder;

use crate::{
    cache::{Access, AccessKind},
    error::TraceError,
};

/// In-trace command switches. Once seen they stay on for the rest of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Switch {
    Version,
    Echo,
    Debug,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Switch(Switch),
    /// `echo` keeps the operation and address tokens as written.
    Access { access: Access, echo: String },
}

/// Decodes the whitespace-separated trace format: `-v`/`-t`/`-d` switches
/// and `r|w <address>` pairs, in any line layout.
pub struct Parser<R> {
    reader: R,
    line: usize,
    pending: VecDeque<String>,
    done: bool,
}

impl<R: BufRead> Parser<R> {
    pub fn new(reader: R) -> Self {
        Parser {
            reader,
            line: 0,
            pending: VecDeque::new(),
            done: false,
        }
    }

    fn next_token(&mut self) -> io::Result<Option<(usize, String)>> {
        let mut buf = String::new();
        while self.pending.is_empty() {
            buf.clear();
            if self.reader.read_line(&mut buf)? == 0 {
                return Ok(None);
            }
            self.line += 1;
            self.pending
                .extend(buf.split_whitespace().map(str::to_owned));
        }
        Ok(self.pending.pop_front().map(|token| (self.line, token)))
    }

    fn next_record(&mut self) -> Result<Option<Record>, TraceError> {
        loop {
            let Some((line, token)) = self.next_token()? else {
                return Ok(None);
            };

            if let Some(flag) = token.strip_prefix('-') {
                let switch = match flag.chars().next().map(|c| c.to_ascii_lowercase()) {
                    Some('v') => Switch::Version,
                    Some('t') => Switch::Echo,
                    Some('d') => Switch::Debug,
                    _ => {
                        tracing::warn!(line, %token, "ignoring unknown switch");
                        continue;
                    }
                };
                return Ok(Some(Record::Switch(switch)));
            }

            let kind = match token.chars().next().map(|c| c.to_ascii_lowercase()) {
                Some('r') => AccessKind::Read,
                Some('w') => AccessKind::Write,
                _ => return Err(TraceError::UnknownOp { line, token }),
            };
            let Some((line, addr_token)) = self.next_token()? else {
                return Err(TraceError::MissingAddress { line, op: token });
            };
            let addr = parse_address(&addr_token).map_err(|err_kind| match err_kind {
                IntErrorKind::PosOverflow => TraceError::AddressOverflow {
                    line,
                    token: addr_token.clone(),
                },
                _ => TraceError::BadAddress {
                    line,
                    token: addr_token.clone(),
                },
            })?;

            return Ok(Some(Record::Access {
                access: Access { kind, addr },
                echo: format!("{token} {addr_token}"),
            }));
        }
    }
}

impl<R: BufRead> Iterator for Parser<R> {
    type Item = Result<Record, TraceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = self.next_record().transpose();
        if !matches!(item, Some(Ok(_))) {
            self.done = true;
        }
        item
    }
}

/// Parses with C `strtol` base detection: `0x` hex, leading `0` octal,
/// decimal otherwise.
pub fn parse_address(token: &str) -> Result<u32, IntErrorKind> {
    let (digits, radix) = if let Some(hex) = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
    {
        (hex, 16)
    } else if token.len() > 1 && token.starts_with('0') {
        (&token[1..], 8)
    } else {
        (token, 10)
    };
    u32::from_str_radix(digits, radix).map_err(|err| err.kind().clone())
}

pub struct Trace {
    pub rec: Receiver<Result<Vec<Record>, TraceError>>,
    _thread: JoinHandle<()>,
}

impl Trace {
    /// Starts a reader thread that parses `path` (xz-compressed if it ends
    /// in `.xz`) and queues blocks of records. A parse error is the last item.
    pub fn read(
        path: PathBuf,
        records_per_block: usize,
        blocks_per_queue: usize,
    ) -> io::Result<Trace> {
        let file = fs::File::open(&path)?;
        let stream: Box<dyn Read + Send> = if path.extension().is_some_and(|ext| ext == "xz") {
            Box::new(XzDecoder::new(file))
        } else {
            Box::new(file)
        };
        let (sender, receiver) = crossbeam::channel::bounded(blocks_per_queue);

        let records_per_block = records_per_block.max(1);
        let t = thread::spawn(move || {
            Trace::run_thread(BufReader::new(stream), records_per_block, sender)
        });

        Ok(Trace {
            rec: receiver,
            _thread: t,
        })
    }

    fn run_thread<R: BufRead>(
        reader: R,
        records_per_block: usize,
        queue: Sender<Result<Vec<Record>, TraceError>>,
    ) {
        let mut block = Vec::with_capacity(records_per_block);
        for record in Parser::new(reader) {
            let record = match record {
                Ok(record) => record,
                Err(err) => {
                    let _ = queue.send(Ok(block)).and_then(|()| queue.send(Err(err)));
                    return;
                }
            };
            block.push(record);
            if block.len() == records_per_block {
                let full = mem::replace(&mut block, Vec::with_capacity(records_per_block));
                if queue.send(Ok(full)).is_err() {
                    // receiver hung up
                    return;
                }
            }
        }
        if !block.is_empty() {
            let _ = queue.send(Ok(block));
        }
    }
}
