//! GDSII record tags: `(record_type << 8) | data_type`. Only the tags the
//! parser branches on are named; everything else falls through to the
//! unknown-tag path (an error in the fast decoder, a counted skip in the
//! permissive fallback).

pub const HEADER: u16 = 0x0002;
pub const BGNLIB: u16 = 0x0102;
pub const LIBNAME: u16 = 0x0206;
pub const UNITS: u16 = 0x0305;
pub const ENDLIB: u16 = 0x0400;
pub const BGNSTR: u16 = 0x0502;
pub const STRNAME: u16 = 0x0606;
pub const ENDSTR: u16 = 0x0700;
pub const BOUNDARY: u16 = 0x0800;
pub const PATH: u16 = 0x0900;
pub const SREF: u16 = 0x0A00;
pub const AREF: u16 = 0x0B00;
pub const TEXT: u16 = 0x0C00;
pub const LAYER: u16 = 0x0D02;
pub const DATATYPE: u16 = 0x0E02;
pub const WIDTH: u16 = 0x0F03;
pub const XY: u16 = 0x1003;
pub const ENDEL: u16 = 0x1100;
pub const SNAME: u16 = 0x1206;
pub const COLROW: u16 = 0x1302;
pub const STRING: u16 = 0x1906;
pub const STRANS: u16 = 0x1A01;
pub const MAG: u16 = 0x1B05;
pub const ANGLE: u16 = 0x1C05;
pub const PATHTYPE: u16 = 0x2102;
pub const BOX: u16 = 0x2D00;
/// Deprecated, appears inside `PATH`; must be skipped without error.
pub const BGNEXTN: u16 = 0x3003;
/// Deprecated, appears inside `PATH`; must be skipped without error.
pub const ENDEXTN: u16 = 0x3103;

/// `STRANS`'s bit 15 is the x-axis mirror flag; the rest of the bit array
/// is unused by this core.
pub const STRANS_MIRROR_BIT: u16 = 0x8000;
