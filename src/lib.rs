//! Control a Cryo-con temperature controller over a Prologix GPIB-Ethernet adapter.
//!
//! The adapter exposes the GPIB bus as a plain TCP socket. [`prologix`] owns that
//! socket and speaks the adapter's line-oriented `++` directive protocol;
//! [`cryocon`] drives the instrument's ASCII command language on top of it.

#[macro_use]
extern crate lazy_static;

use std::io;

use thiserror::Error;

pub mod cryocon;
pub mod prologix;
pub mod scpi;

pub use cryocon::CryoCon;
pub use prologix::{AdapterAddress, PrologixEthernet};

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO Error occurred: {0}")]
    Io(io::Error),
    #[error("Cannot connect to the adapter: {0}")]
    Connect(io::Error),
    #[error("Adapter is not connected")]
    NotConnected,
    #[error("Timeout")]
    Timeout,
    #[error("Reply is not valid ASCII")]
    Decode,
    #[error("No decimal value in reply: {0:?}")]
    MalformedReply(String),
    #[error("Argument Error {0}")]
    Argument(anyhow::Error),
}

impl Error {
    pub fn io(err: io::Error) -> Error {
        Error::Io(err)
    }

    pub fn argument(err: anyhow::Error) -> Error {
        Error::Argument(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
