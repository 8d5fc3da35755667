//! # Fragmented Message Reassembly
//!
//! WebSocket clients may split one binary message into a first frame and any
//! number of continuation frames. The transport hands these over piece by
//! piece; [`MessageAssembler`] glues them back into the single audio frame the
//! client sent, so the relay always sees whole client messages.
//!
//! A message that grows past the limit is dropped as a whole (the relay never
//! forwards a truncated frame). Fragmented text messages are skipped, the same
//! as unfragmented ones.

use actix_http::ws::Item;

/// Result of feeding one fragment.
#[derive(Debug, PartialEq)]
pub enum Assembly {
    /// More fragments are needed
    Pending,
    /// A complete binary message
    Audio(Vec<u8>),
    /// A complete binary message that exceeded the limit; carries its total size
    Oversized(usize),
    /// A fragment that is not part of a binary message
    Ignored,
}

#[derive(Debug, Default)]
enum Partial {
    #[default]
    Idle,
    Binary(Vec<u8>),
    Discarding(usize),
    Text,
}

#[derive(Debug)]
pub struct MessageAssembler {
    partial: Partial,
    max_bytes: usize,
}

impl MessageAssembler {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            partial: Partial::Idle,
            max_bytes,
        }
    }

    pub fn push(&mut self, item: Item) -> Assembly {
        match item {
            Item::FirstBinary(bytes) => {
                self.partial = Partial::Idle;
                self.extend(&bytes);
                Assembly::Pending
            }
            Item::FirstText(_) => {
                self.partial = Partial::Text;
                Assembly::Pending
            }
            Item::Continue(bytes) => match self.partial {
                Partial::Idle => Assembly::Ignored,
                _ => {
                    self.extend(&bytes);
                    Assembly::Pending
                }
            },
            Item::Last(bytes) => {
                if matches!(self.partial, Partial::Idle) {
                    return Assembly::Ignored;
                }
                self.extend(&bytes);
                match std::mem::take(&mut self.partial) {
                    Partial::Binary(payload) => Assembly::Audio(payload),
                    Partial::Discarding(total) => Assembly::Oversized(total),
                    Partial::Text | Partial::Idle => Assembly::Ignored,
                }
            }
        }
    }

    fn extend(&mut self, bytes: &[u8]) {
        self.partial = match std::mem::take(&mut self.partial) {
            Partial::Idle => self.start(bytes),
            Partial::Binary(mut payload) => {
                if payload.len() + bytes.len() > self.max_bytes {
                    Partial::Discarding(payload.len() + bytes.len())
                } else {
                    payload.extend_from_slice(bytes);
                    Partial::Binary(payload)
                }
            }
            Partial::Discarding(total) => Partial::Discarding(total + bytes.len()),
            Partial::Text => Partial::Text,
        };
    }

    fn start(&self, bytes: &[u8]) -> Partial {
        if bytes.len() > self.max_bytes {
            Partial::Discarding(bytes.len())
        } else {
            Partial::Binary(bytes.to_vec())
        }
    }
}
