//! Line-delimited JSON-RPC envelope codec for worker processes.
//!
//! The wire format is newline-delimited UTF-8 JSON-RPC 2.0. Four logical
//! frame kinds exist: requests, successful responses, error responses, and
//! notifications — the latter includes the `stream/chunk` sub-type carrying
//! progressive partial results.
//!
//! The codec is pure and stateless apart from [`LineBuffer`]: encoding has
//! no side effects and cannot fail, and decoding never fails loudly — a
//! garbled line from an imperfect worker decodes to `None` instead of
//! aborting the channel.

pub mod codec;
pub mod codes;
pub mod envelope;

pub use codec::{decode_line, encode_request, LineBuffer};
pub use codes::code_name;
pub use envelope::{Envelope, RpcErrorBody, StreamChunk, STREAM_CHUNK_METHOD};
