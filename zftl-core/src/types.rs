// vim: tw=80
//! Common type definitions used throughout zftl

use enum_primitive_derive::Primitive;
use num_traits::{FromPrimitive, ToPrimitive};
use serde_derive::{Deserialize, Serialize};
use thiserror::Error;
use std::{
    fmt::{self, Display, Formatter},
    io,
    ops::{Add, AddAssign, Sub},
};

/// Indexes a logical block, as seen by users of the translated address space.
pub type LbaT = u64;

/// Marks a physical block, or a persistent-cache tag, as not owning any LBA.
pub const LBA_INVALID: LbaT = LbaT::MAX;

/// Indexes a zone of the base device.
pub type ZoneT = u32;

/// Indexes a `Band`.  A band's index is its stable identity.
pub type BandT = u32;

/// zftl's error type.  Basically just an errno
#[derive(Clone, Copy, Debug, Deserialize, Error, Eq, PartialEq, Primitive, Serialize)]
pub enum Error {
    // Standard errnos
    #[error("Operation not permitted")]
    EPERM           = libc::EPERM as isize,
    #[error("No such file or directory")]
    ENOENT          = libc::ENOENT as isize,
    #[error("Input/output error")]
    EIO             = libc::EIO as isize,
    #[error("Device not configured")]
    ENXIO           = libc::ENXIO as isize,
    #[error("Cannot allocate memory")]
    ENOMEM          = libc::ENOMEM as isize,
    #[error("Device busy")]
    EBUSY           = libc::EBUSY as isize,
    #[error("Operation not supported by device")]
    ENODEV          = libc::ENODEV as isize,
    #[error("Invalid argument")]
    EINVAL          = libc::EINVAL as isize,
    #[error("No space left on device")]
    ENOSPC          = libc::ENOSPC as isize,
    #[error("Result too large")]
    ERANGE          = libc::ERANGE as isize,
    #[error("Resource temporarily unavailable")]
    EAGAIN          = libc::EAGAIN as isize,
    #[error("Operation already in progress")]
    EALREADY        = libc::EALREADY as isize,
    #[error("Operation canceled")]
    ECANCELED       = libc::ECANCELED as isize,
    #[error("Bad message")]
    EBADMSG         = libc::EBADMSG as isize,

    //// zftl custom error types below
    #[error("Unknown error")]
    EUNKNOWN        = 256,
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        e.raw_os_error()
            .and_then(Error::from_i32)
            .unwrap_or(Error::EUNKNOWN)
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        match *e {
            bincode::ErrorKind::Io(ioe) => Error::from(ioe),
            _ => Error::EBADMSG
        }
    }
}

impl From<Error> for i32 {
    fn from(e: Error) -> Self {
        match e {
            Error::EUNKNOWN =>
                panic!("Unknown error codes should never be exposed"),
            _ => e.to_i32().unwrap()
        }
    }
}

pub type Result<T> = ::std::result::Result<T, Error>;

/// Physical address of one block on the base device.
///
/// `addr = zone_id * zone_size + offset_in_zone`.  Given the device geometry,
/// every valid address belongs to exactly one zone and exactly one band.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq,
         PartialOrd, Serialize)]
pub struct Addr(pub u64);

impl Addr {
    pub const INVALID: Addr = Addr(u64::MAX);

    pub fn is_valid(self) -> bool {
        self != Addr::INVALID
    }
}

impl Add<u64> for Addr {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        debug_assert!(self.is_valid());
        Addr(self.0 + rhs)
    }
}

impl AddAssign<u64> for Addr {
    fn add_assign(&mut self, rhs: u64) {
        *self = *self + rhs;
    }
}

impl Sub<u64> for Addr {
    type Output = Self;

    fn sub(self, rhs: u64) -> Self::Output {
        debug_assert!(self.is_valid());
        Addr(self.0 - rhs)
    }
}

/// Distance in blocks between two addresses
impl Sub<Addr> for Addr {
    type Output = u64;

    fn sub(self, rhs: Addr) -> Self::Output {
        self.0 - rhs.0
    }
}

impl From<u64> for Addr {
    fn from(a: u64) -> Self {
        Addr(a)
    }
}

impl From<Addr> for u64 {
    fn from(a: Addr) -> Self {
        a.0
    }
}

impl Display for Addr {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{:#x}", self.0)
        } else {
            "INVALID".fmt(f)
        }
    }
}

// LCOV_EXCL_STOP
