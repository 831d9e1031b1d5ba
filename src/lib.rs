//! FEC-AL: forward error correction at the application layer
//!
//! A block erasure code over GF(2^8) built on the Siamese matrix structure.
//! An [`Encoder`] over K input symbols produces an unlimited stream of
//! recovery symbols; a [`Decoder`] that has received any K' >= K symbols
//! (originals plus recovery) recovers every original with high probability,
//! and retrying with one or two extra recovery symbols succeeds almost
//! always. The construction is tuned for the regime where losses are small
//! relative to K.
//!
//! The code is not MDS: K received symbols occasionally fail to solve, which
//! is the price of encode cost that stays flat as K grows. Feed the decoder
//! more recovery symbols when [`Error::NeedMoreData`] comes back.
//!
//! ```
//! use fecal::{Decoder, Encoder};
//!
//! let block: Vec<Vec<u8>> = (0..4u8).map(|c| vec![c; 8]).collect();
//! let refs: Vec<&[u8]> = block.iter().map(|b| b.as_slice()).collect();
//! let mut encoder = Encoder::new(&refs, 32).unwrap();
//!
//! // Column 2 is lost; one recovery symbol replaces it
//! let mut symbol = vec![0u8; 8];
//! encoder.encode(0, &mut symbol).unwrap();
//!
//! let mut decoder = Decoder::new(4, 32).unwrap();
//! for column in [0usize, 1, 3] {
//!     decoder.add_original(column, &block[column]).unwrap();
//! }
//! decoder.add_recovery(0, symbol).unwrap();
//!
//! let recovered = decoder.decode().unwrap();
//! assert_eq!(recovered.len(), 1);
//! assert_eq!(recovered[0].index, 2);
//! assert_eq!(recovered[0].data, &block[2][..]);
//! ```
//!
//! Instances are single-threaded and synchronous; distinct instances share
//! no state.

pub mod aligned;
pub mod bitset;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod gf256;
pub mod params;
pub mod prng;
pub mod window;

pub use decoder::{Decoder, RecoveredSymbol};
pub use encoder::Encoder;
pub use error::{Error, Result};
pub use window::WindowParams;

/// Verify the GF(2^8) arithmetic once at startup
///
/// The field tables are built at compile time, so nothing here is required
/// before using the codec; this exists for callers that want the platform
/// check at a controlled point.
pub fn init() -> Result<()> {
    if gf256::self_test() {
        Ok(())
    } else {
        Err(Error::Platform)
    }
}
