//! Memory descriptors: logical shape, data type and physical layout of a
//! tensor, independent of any buffer.
//!
//! A descriptor is a plain `Copy` value. Equality is structural over every
//! field, so two descriptors compare equal only when they describe the same
//! bytes in the same places. That is the comparison workspace negotiation
//! between forward and backward passes relies on.

mod wrapper;

pub use wrapper::MemoryDescWrapper;

use std::fmt;

use crate::error::{Error, Result};
use crate::types::{DataType, Dim, Dims, MAX_NDIMS};

/// Strides of the outer (blocked) dimensions plus the inner block chain.
///
/// Inner blocks are listed outermost first; `inner_idxs[i]` names the
/// logical dimension the `i`-th inner block splits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockingDesc {
    pub strides: Dims,
    pub inner_nblks: usize,
    pub inner_blks: Dims,
    pub inner_idxs: Dims,
}

impl BlockingDesc {
    const fn empty() -> Self {
        Self {
            strides: [0; MAX_NDIMS],
            inner_nblks: 0,
            inner_blks: [0; MAX_NDIMS],
            inner_idxs: [0; MAX_NDIMS],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FormatKind {
    #[default]
    Undef,
    /// Layout left for the implementation to choose.
    Any,
    Blocked(BlockingDesc),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryDesc {
    pub ndims: usize,
    pub dims: Dims,
    pub data_type: DataType,
    pub padded_dims: Dims,
    pub padded_offsets: Dims,
    pub offset0: Dim,
    pub format: FormatKind,
}

/// The descriptor of an absent argument.
pub static ZERO_MD: MemoryDesc = MemoryDesc::zero();

impl Default for MemoryDesc {
    fn default() -> Self {
        Self::zero()
    }
}

impl MemoryDesc {
    pub const fn zero() -> Self {
        Self {
            ndims: 0,
            dims: [0; MAX_NDIMS],
            data_type: DataType::Undef,
            padded_dims: [0; MAX_NDIMS],
            padded_offsets: [0; MAX_NDIMS],
            offset0: 0,
            format: FormatKind::Undef,
        }
    }

    /// Descriptor for `dims` laid out according to `tag`.
    ///
    /// Blocked dimensions are padded up to a multiple of their block size.
    pub fn new(dims: &[Dim], data_type: DataType, tag: FormatTag) -> Result<Self> {
        let mut md = Self::with_shape(dims, data_type)?;
        match tag {
            FormatTag::undef => return Err(Error::invalid("format tag is undef")),
            FormatTag::any => {
                md.format = FormatKind::Any;
                return Ok(md);
            }
            _ => {}
        }
        let layout = TagLayout::parse(tag.pattern())
            .ok_or_else(|| Error::invalid(format!("malformed format tag {tag:?}")))?;
        if layout.order.len() != md.ndims {
            return Err(Error::invalid(format!(
                "format tag {} expects {} dims, got {}",
                tag.pattern(),
                layout.order.len(),
                md.ndims
            )));
        }

        let mut bd = BlockingDesc::empty();
        let mut blocks = [1 as Dim; MAX_NDIMS];
        for (i, &(d, blk)) in layout.blocks.iter().enumerate() {
            bd.inner_blks[i] = blk;
            bd.inner_idxs[i] = d as Dim;
            blocks[d] *= blk;
        }
        bd.inner_nblks = layout.blocks.len();

        for d in 0..md.ndims {
            md.padded_dims[d] = round_up(md.dims[d], blocks[d]).ok_or_else(|| too_large(dims))?;
        }

        let mut stride: Dim = blocks[..md.ndims].iter().product();
        for &d in layout.order.iter().rev() {
            bd.strides[d] = stride;
            stride = stride
                .checked_mul((md.padded_dims[d] / blocks[d]).max(1))
                .ok_or_else(|| too_large(dims))?;
        }
        md.format = FormatKind::Blocked(bd);
        check_layout(&md)?;
        Ok(md)
    }

    /// Descriptor whose layout is left for an implementation to choose.
    pub fn any(dims: &[Dim], data_type: DataType) -> Result<Self> {
        Self::new(dims, data_type, FormatTag::any)
    }

    /// Plain (unblocked) descriptor with explicit element strides.
    pub fn with_strides(dims: &[Dim], data_type: DataType, strides: &[Dim]) -> Result<Self> {
        let mut md = Self::with_shape(dims, data_type)?;
        if strides.len() != md.ndims {
            return Err(Error::invalid(format!(
                "{} strides for {} dims",
                strides.len(),
                md.ndims
            )));
        }
        if strides.iter().any(|&s| s <= 0) {
            return Err(Error::invalid("strides must be positive"));
        }
        let mut bd = BlockingDesc::empty();
        bd.strides[..md.ndims].copy_from_slice(strides);
        md.padded_dims = md.dims;
        md.format = FormatKind::Blocked(bd);
        check_layout(&md)?;
        Ok(md)
    }

    fn with_shape(dims: &[Dim], data_type: DataType) -> Result<Self> {
        if dims.is_empty() || dims.len() > MAX_NDIMS {
            return Err(Error::invalid(format!("unsupported rank {}", dims.len())));
        }
        if dims.iter().any(|&d| d < 0) {
            return Err(Error::invalid(format!("negative dimension in {dims:?}")));
        }
        if data_type == DataType::Undef {
            return Err(Error::invalid("data type is undef"));
        }
        dims.iter()
            .try_fold(data_type.size() as Dim, |acc, &d| acc.checked_mul(d))
            .filter(|&bytes| bytes <= isize::MAX as Dim)
            .ok_or_else(|| too_large(dims))?;
        let mut md = Self::zero();
        md.ndims = dims.len();
        md.dims[..dims.len()].copy_from_slice(dims);
        md.data_type = data_type;
        Ok(md)
    }

    /// Copy of this descriptor with another data type; layout is unchanged.
    pub fn with_data_type(&self, data_type: DataType) -> Self {
        Self { data_type, ..*self }
    }

    pub fn dims(&self) -> &[Dim] {
        &self.dims[..self.ndims]
    }

    pub fn padded_dims(&self) -> &[Dim] {
        &self.padded_dims[..self.ndims]
    }

    pub fn is_zero(&self) -> bool {
        self.ndims == 0
    }

    pub fn is_any(&self) -> bool {
        self.format == FormatKind::Any
    }
}

impl fmt::Display for MemoryDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return f.write_str("undef");
        }
        let mdw = MemoryDescWrapper::new(self);
        write!(f, "{}:{}:", self.data_type, mdw.format_str())?;
        for (i, d) in self.dims().iter().enumerate() {
            if i > 0 {
                f.write_str("x")?;
            }
            write!(f, "{d}")?;
        }
        Ok(())
    }
}

/// `v` rounded up to a multiple of `m`; `None` on overflow.
pub(crate) fn round_up(v: Dim, m: Dim) -> Option<Dim> {
    if m <= 1 {
        Some(v)
    } else {
        Some(v.checked_add(m - 1)? / m * m)
    }
}

fn too_large(dims: &[Dim]) -> Error {
    Error::invalid(format!("extent of {dims:?} overflows"))
}

/// Reject blocked layouts that cannot back a buffer: inner blocks naming a
/// missing dimension, padding that does not cover the dims, two logical
/// elements sharing an offset, or a byte extent beyond `isize::MAX`.
///
/// Outer dimensions sorted by stride must each step over everything the
/// previous one spans, starting from the inner block.
pub(crate) fn check_layout(md: &MemoryDesc) -> Result<()> {
    let FormatKind::Blocked(bd) = &md.format else {
        return Ok(());
    };
    let nd = md.ndims;
    if nd == 0 || nd > MAX_NDIMS || bd.inner_nblks > MAX_NDIMS {
        return Err(Error::invalid(format!(
            "rank {nd} with {} inner blocks",
            bd.inner_nblks
        )));
    }
    let dims = md.dims();
    if dims.iter().any(|&d| d == 0) {
        return Ok(());
    }

    let mut blocks = [1 as Dim; MAX_NDIMS];
    let mut inner: Dim = 1;
    for i in 0..bd.inner_nblks {
        let (d, blk) = (bd.inner_idxs[i], bd.inner_blks[i]);
        if d < 0 || d as usize >= nd || blk <= 0 {
            return Err(Error::invalid(format!("inner block {blk} on dim {d}")));
        }
        blocks[d as usize] = blocks[d as usize]
            .checked_mul(blk)
            .ok_or_else(|| too_large(dims))?;
        inner = inner.checked_mul(blk).ok_or_else(|| too_large(dims))?;
    }

    let mut outer = Vec::with_capacity(nd);
    let mut extent = inner;
    for d in 0..nd {
        let (padded, off) = (md.padded_dims[d], md.padded_offsets[d]);
        let covered = off >= 0 && off.checked_add(dims[d]).is_some_and(|end| end <= padded);
        if !covered || padded % blocks[d] != 0 {
            return Err(Error::invalid(format!(
                "padded dim {padded} does not cover dim {d} of {dims:?}"
            )));
        }
        let n = padded / blocks[d];
        let stride = bd.strides[d];
        if n > 1 {
            if stride <= 0 {
                return Err(Error::invalid(format!("stride of dim {d} must be positive")));
            }
            outer.push((stride, n));
        }
        extent = extent.max(stride.checked_mul(n).ok_or_else(|| too_large(dims))?);
    }

    outer.sort_unstable();
    let mut span = inner;
    for &(stride, n) in &outer {
        if stride < span {
            return Err(Error::invalid(format!(
                "strides {:?} of {dims:?} overlap",
                &bd.strides[..nd]
            )));
        }
        span = stride.checked_mul(n).ok_or_else(|| too_large(dims))?;
    }

    extent
        .checked_add(md.offset0)
        .filter(|_| md.offset0 >= 0)
        .and_then(|e| e.checked_mul(md.data_type.size() as Dim))
        .filter(|&bytes| bytes <= isize::MAX as Dim)
        .map(|_| ())
        .ok_or_else(|| too_large(dims))
}

// =============================================================================
// Format tags
// =============================================================================

/// Named layouts.
///
/// A tag reads as a layout pattern: lowercase letters give the order of the
/// outer dimensions (`a` is dimension 0), an uppercase letter marks a blocked
/// dimension, and trailing `<n><letter>` pairs are the inner blocks from
/// outermost to innermost. `aBcd16b` is channels blocked by 16.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatTag {
    undef,
    any,
    a,
    ab,
    ba,
    abc,
    acb,
    cba,
    abcd,
    acdb,
    cdba,
    abcde,
    acdeb,
    aBc16b,
    aBcd8b,
    aBcd16b,
    aBcde16b,
    ABcd8b8a,
    ABcd16b16a,
    ABc4b16a4b,
    ABcd4b16a4b,
}

impl FormatTag {
    pub const X: FormatTag = FormatTag::a;
    pub const NC: FormatTag = FormatTag::ab;
    pub const CN: FormatTag = FormatTag::ba;
    pub const NCW: FormatTag = FormatTag::abc;
    pub const NWC: FormatTag = FormatTag::acb;
    pub const NCHW: FormatTag = FormatTag::abcd;
    pub const NHWC: FormatTag = FormatTag::acdb;
    pub const NCDHW: FormatTag = FormatTag::abcde;
    pub const NDHWC: FormatTag = FormatTag::acdeb;
    pub const OI: FormatTag = FormatTag::ab;
    pub const IO: FormatTag = FormatTag::ba;
    pub const OIW: FormatTag = FormatTag::abc;
    pub const WIO: FormatTag = FormatTag::cba;
    pub const OIHW: FormatTag = FormatTag::abcd;
    pub const HWIO: FormatTag = FormatTag::cdba;
    pub const N_C_W16C: FormatTag = FormatTag::aBc16b;
    pub const N_CHW8C: FormatTag = FormatTag::aBcd8b;
    pub const N_CHW16C: FormatTag = FormatTag::aBcd16b;
    pub const N_CDHW16C: FormatTag = FormatTag::aBcde16b;
    pub const OIHW8I8O: FormatTag = FormatTag::ABcd8b8a;
    pub const OIHW16I16O: FormatTag = FormatTag::ABcd16b16a;
    pub const OIW4I16O4I: FormatTag = FormatTag::ABc4b16a4b;
    pub const OIHW4I16O4I: FormatTag = FormatTag::ABcd4b16a4b;

    pub fn pattern(self) -> &'static str {
        match self {
            FormatTag::undef => "undef",
            FormatTag::any => "any",
            FormatTag::a => "a",
            FormatTag::ab => "ab",
            FormatTag::ba => "ba",
            FormatTag::abc => "abc",
            FormatTag::acb => "acb",
            FormatTag::cba => "cba",
            FormatTag::abcd => "abcd",
            FormatTag::acdb => "acdb",
            FormatTag::cdba => "cdba",
            FormatTag::abcde => "abcde",
            FormatTag::acdeb => "acdeb",
            FormatTag::aBc16b => "aBc16b",
            FormatTag::aBcd8b => "aBcd8b",
            FormatTag::aBcd16b => "aBcd16b",
            FormatTag::aBcde16b => "aBcde16b",
            FormatTag::ABcd8b8a => "ABcd8b8a",
            FormatTag::ABcd16b16a => "ABcd16b16a",
            FormatTag::ABc4b16a4b => "ABc4b16a4b",
            FormatTag::ABcd4b16a4b => "ABcd4b16a4b",
        }
    }

    /// Plain row-major tag for a rank, used when resolving `any`.
    pub fn plain_for_ndims(ndims: usize) -> Option<FormatTag> {
        match ndims {
            1 => Some(FormatTag::a),
            2 => Some(FormatTag::ab),
            3 => Some(FormatTag::abc),
            4 => Some(FormatTag::abcd),
            5 => Some(FormatTag::abcde),
            _ => None,
        }
    }
}

/// Parsed form of a tag pattern.
struct TagLayout {
    order: Vec<usize>,
    blocks: Vec<(usize, Dim)>,
}

impl TagLayout {
    fn parse(pattern: &str) -> Option<Self> {
        let bytes = pattern.as_bytes();
        let split = bytes
            .iter()
            .position(|b| b.is_ascii_digit())
            .unwrap_or(bytes.len());
        let (outer, inner) = bytes.split_at(split);

        let mut order = Vec::with_capacity(outer.len());
        for &c in outer {
            if !c.is_ascii_alphabetic() {
                return None;
            }
            let d = (c.to_ascii_lowercase() - b'a') as usize;
            if d >= MAX_NDIMS || order.contains(&d) {
                return None;
            }
            order.push(d);
        }

        let mut blocks = Vec::new();
        let mut num: Dim = 0;
        for &c in inner {
            if c.is_ascii_digit() {
                num = num * 10 + Dim::from(c - b'0');
            } else if c.is_ascii_lowercase() && num > 0 {
                let d = (c - b'a') as usize;
                if !order.contains(&d) {
                    return None;
                }
                blocks.push((d, num));
                num = 0;
            } else {
                return None;
            }
        }
        if num != 0 || blocks.len() > MAX_NDIMS {
            return None;
        }
        // every blocked dim must be marked uppercase in the outer part
        for &(d, _) in &blocks {
            let marker = outer[order.iter().position(|&o| o == d)?];
            if !marker.is_ascii_uppercase() {
                return None;
            }
        }
        Some(Self { order, blocks })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocking(md: &MemoryDesc) -> BlockingDesc {
        match md.format {
            FormatKind::Blocked(bd) => bd,
            _ => panic!("not blocked"),
        }
    }

    #[test]
    fn test_plain_strides() {
        let md = MemoryDesc::new(&[2, 3, 4, 5], DataType::F32, FormatTag::NCHW).unwrap();
        assert_eq!(&blocking(&md).strides[..4], &[60, 20, 5, 1]);
        let md = MemoryDesc::new(&[2, 3, 4, 5], DataType::F32, FormatTag::NHWC).unwrap();
        assert_eq!(&blocking(&md).strides[..4], &[60, 1, 15, 3]);
    }

    #[test]
    fn test_blocked_channels_padded() {
        let md = MemoryDesc::new(&[2, 17, 3, 3], DataType::F32, FormatTag::N_CHW16C).unwrap();
        assert_eq!(md.padded_dims(), &[2, 32, 3, 3]);
        let bd = blocking(&md);
        assert_eq!(bd.inner_nblks, 1);
        assert_eq!(bd.inner_blks[0], 16);
        assert_eq!(bd.inner_idxs[0], 1);
        assert_eq!(&bd.strides[..4], &[2 * 16 * 9, 16 * 9, 3 * 16, 16]);
    }

    #[test]
    fn test_double_blocked_weights() {
        let md =
            MemoryDesc::new(&[32, 8, 3, 3], DataType::F32, FormatTag::OIHW4I16O4I).unwrap();
        assert_eq!(md.padded_dims(), &[32, 16, 3, 3]);
        let bd = blocking(&md);
        assert_eq!(bd.inner_nblks, 3);
        assert_eq!(&bd.inner_blks[..3], &[4, 16, 4]);
        assert_eq!(&bd.inner_idxs[..3], &[1, 0, 1]);
    }

    #[test]
    fn test_rank_mismatch_rejected() {
        assert!(matches!(
            MemoryDesc::new(&[2, 3], DataType::F32, FormatTag::NCHW),
            Err(Error::InvalidArguments(_))
        ));
        assert!(MemoryDesc::new(&[], DataType::F32, FormatTag::a).is_err());
        assert!(MemoryDesc::new(&[-1], DataType::F32, FormatTag::a).is_err());
        assert!(MemoryDesc::new(&[4], DataType::Undef, FormatTag::a).is_err());
    }

    #[test]
    fn test_any_keeps_shape_only() {
        let md = MemoryDesc::any(&[4, 8], DataType::S8).unwrap();
        assert!(md.is_any());
        assert_eq!(md.dims(), &[4, 8]);
        assert_eq!(md.padded_dims(), &[0, 0]);
    }

    #[test]
    fn test_structural_equality() {
        let a = MemoryDesc::new(&[8, 16], DataType::F32, FormatTag::NC).unwrap();
        let b = MemoryDesc::new(&[8, 16], DataType::F32, FormatTag::NC).unwrap();
        let c = MemoryDesc::new(&[8, 16], DataType::F32, FormatTag::CN).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, a.with_data_type(DataType::Bf16));
        assert_eq!(ZERO_MD, MemoryDesc::zero());
    }

    #[test]
    fn test_tag_parser_rejects_garbage() {
        assert!(TagLayout::parse("ab16c").is_none());
        assert!(TagLayout::parse("aa").is_none());
        assert!(TagLayout::parse("aB16").is_none());
        assert!(TagLayout::parse("aBcd16b").is_some());
    }

    #[test]
    fn test_overlapping_strides_rejected() {
        assert!(matches!(
            MemoryDesc::with_strides(&[2, 2], DataType::F32, &[1, 1]),
            Err(Error::InvalidArguments(_))
        ));
        assert!(MemoryDesc::with_strides(&[3, 4], DataType::F32, &[3, 1]).is_err());
        // transposed and gapped layouts are fine, and size-1 dims may alias
        assert!(MemoryDesc::with_strides(&[3, 4], DataType::F32, &[1, 3]).is_ok());
        assert!(MemoryDesc::with_strides(&[3, 4], DataType::F32, &[8, 1]).is_ok());
        assert!(MemoryDesc::with_strides(&[1, 4], DataType::F32, &[1, 1]).is_ok());
    }

    #[test]
    fn test_overflowing_extent_rejected() {
        assert!(matches!(
            MemoryDesc::new(&[1 << 32, 1 << 32], DataType::F32, FormatTag::ab),
            Err(Error::InvalidArguments(_))
        ));
        assert!(MemoryDesc::any(&[1 << 40, 1 << 40], DataType::U8).is_err());
        assert!(MemoryDesc::with_strides(&[2, 2], DataType::F32, &[Dim::MAX / 2, 1]).is_err());
        assert!(MemoryDesc::new(&[1, Dim::MAX - 3, 1, 1], DataType::U8, FormatTag::N_CHW16C).is_err());
    }

    #[test]
    fn test_check_layout_on_hand_built_descriptor() {
        let mut md = MemoryDesc::new(&[4, 4], DataType::F32, FormatTag::NC).unwrap();
        assert!(check_layout(&md).is_ok());
        if let FormatKind::Blocked(bd) = &mut md.format {
            bd.strides[0] = 2;
        }
        assert!(matches!(check_layout(&md), Err(Error::InvalidArguments(_))));
        let mut md = MemoryDesc::new(&[4, 4], DataType::F32, FormatTag::NC).unwrap();
        md.padded_dims[1] = 3;
        assert!(check_layout(&md).is_err());
    }

    #[test]
    fn test_display() {
        let md = MemoryDesc::new(&[2, 17, 3, 3], DataType::F32, FormatTag::N_CHW16C).unwrap();
        assert_eq!(md.to_string(), "f32:aBcd16b:2x17x3x3");
        assert_eq!(ZERO_MD.to_string(), "undef");
    }
}
