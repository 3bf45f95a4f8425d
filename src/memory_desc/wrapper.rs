//! Read-only query interface over a [`MemoryDesc`].
//!
//! Implementations never inspect descriptor fields directly; they ask the
//! wrapper for element counts, sizes, offsets and layout relations.

use crate::memory_desc::{BlockingDesc, FormatKind, FormatTag, MemoryDesc};
use crate::types::{DataType, Dim, Dims, MAX_NDIMS};

#[derive(Debug, Clone, Copy)]
pub struct MemoryDescWrapper<'a> {
    md: &'a MemoryDesc,
}

impl<'a> MemoryDescWrapper<'a> {
    pub fn new(md: &'a MemoryDesc) -> Self {
        Self { md }
    }

    pub fn md(&self) -> &'a MemoryDesc {
        self.md
    }

    pub fn ndims(&self) -> usize {
        self.md.ndims
    }

    pub fn dims(&self) -> &'a [Dim] {
        self.md.dims()
    }

    pub fn padded_dims(&self) -> &'a [Dim] {
        self.md.padded_dims()
    }

    pub fn data_type(&self) -> DataType {
        self.md.data_type
    }

    pub fn offset0(&self) -> Dim {
        self.md.offset0
    }

    pub fn is_zero(&self) -> bool {
        self.md.is_zero()
    }

    pub fn format_any(&self) -> bool {
        self.md.is_any()
    }

    pub fn blocking_desc(&self) -> Option<&'a BlockingDesc> {
        match &self.md.format {
            FormatKind::Blocked(bd) => Some(bd),
            _ => None,
        }
    }

    pub fn is_blocking_desc(&self) -> bool {
        self.blocking_desc().is_some()
    }

    /// Blocked layout without inner blocks.
    pub fn is_plain(&self) -> bool {
        self.blocking_desc().is_some_and(|bd| bd.inner_nblks == 0)
    }

    /// Element strides; meaningful for the outer blocks of blocked layouts.
    pub fn strides(&self) -> &'a [Dim] {
        match self.blocking_desc() {
            Some(bd) => &bd.strides[..self.md.ndims],
            None => &[],
        }
    }

    /// Number of elements, counting padding when `with_padding`.
    pub fn nelems(&self, with_padding: bool) -> Dim {
        if self.is_zero() {
            return 0;
        }
        let dims = if with_padding && self.is_blocking_desc() {
            self.padded_dims()
        } else {
            self.dims()
        };
        dims.iter().fold(1, |acc: Dim, &d| acc.saturating_mul(d))
    }

    pub fn has_zero_dim(&self) -> bool {
        self.dims().iter().any(|&d| d == 0)
    }

    /// Per-dimension product of inner block sizes.
    pub fn blocks(&self) -> Dims {
        let mut blocks = [1; MAX_NDIMS];
        if let Some(bd) = self.blocking_desc() {
            for i in 0..bd.inner_nblks {
                blocks[bd.inner_idxs[i] as usize] *= bd.inner_blks[i];
            }
        }
        blocks
    }

    /// Bytes a buffer for this descriptor needs, including `offset0`.
    ///
    /// Saturates for descriptors whose extent does not fit, so allocating
    /// one fails with `OutOfMemory`.
    pub fn size(&self) -> usize {
        let Some(bd) = self.blocking_desc() else {
            return 0;
        };
        if self.is_zero() || self.has_zero_dim() {
            return 0;
        }
        let blocks = self.blocks();
        let mut max_size: Dim = 0;
        for d in 0..self.ndims() {
            let n = self.md.padded_dims[d] / blocks[d].max(1);
            max_size = max_size.max(n.saturating_mul(bd.strides[d]));
        }
        if max_size == 1 && bd.inner_nblks != 0 {
            max_size = bd.inner_blks[..bd.inner_nblks]
                .iter()
                .fold(1, |acc: Dim, &b| acc.saturating_mul(b));
        }
        let elems = max_size.saturating_add(self.offset0()).max(0) as usize;
        elems.saturating_mul(self.data_type().size())
    }

    /// True when the buffer holds exactly the (padded) elements, no gaps.
    pub fn is_dense(&self, with_padding: bool) -> bool {
        if !self.is_blocking_desc() || self.is_zero() {
            return false;
        }
        self.nelems(with_padding) as usize * self.data_type().size() == self.size()
    }

    /// Physical element offset of a logical position.
    ///
    /// `pos` is shifted by `padded_offsets` unless `is_pos_padded`.
    pub fn off_v(&self, pos: &[Dim], is_pos_padded: bool) -> Dim {
        let Some(bd) = self.blocking_desc() else {
            return 0;
        };
        let nd = self.ndims();
        let mut p = [0 as Dim; MAX_NDIMS];
        p[..nd].copy_from_slice(&pos[..nd]);
        if !is_pos_padded {
            for (d, v) in p.iter_mut().enumerate().take(nd) {
                *v += self.md.padded_offsets[d];
            }
        }

        let mut phys = self.offset0();
        let mut blk_stride: Dim = 1;
        for iblk in (0..bd.inner_nblks).rev() {
            let d = bd.inner_idxs[iblk] as usize;
            let blk = bd.inner_blks[iblk];
            phys += (p[d] % blk) * blk_stride;
            p[d] /= blk;
            blk_stride *= blk;
        }
        for d in 0..nd {
            phys += p[d] * bd.strides[d];
        }
        phys
    }

    /// Physical element offset of the `l`-th element in row-major logical order.
    pub fn off_l(&self, l: Dim) -> Dim {
        let nd = self.ndims();
        let dims = self.dims();
        let mut pos = [0 as Dim; MAX_NDIMS];
        let mut rem = l;
        for d in (0..nd).rev() {
            pos[d] = rem % dims[d];
            rem /= dims[d];
        }
        self.off_v(&pos[..nd], false)
    }

    /// Same rank and logical dims: an element-wise reorder is well defined.
    pub fn consistent_with(&self, rhs: &MemoryDescWrapper<'_>) -> bool {
        self.ndims() == rhs.ndims() && self.dims() == rhs.dims()
    }

    /// Same physical layout, optionally ignoring padding and data type.
    pub fn similar_to(
        &self,
        rhs: &MemoryDescWrapper<'_>,
        with_padding: bool,
        with_data_type: bool,
    ) -> bool {
        let (Some(a), Some(b)) = (self.blocking_desc(), rhs.blocking_desc()) else {
            return false;
        };
        let nd = self.ndims();
        nd == rhs.ndims()
            && self.dims() == rhs.dims()
            && (!with_data_type || self.data_type() == rhs.data_type())
            && (!with_padding || self.padded_dims() == rhs.padded_dims())
            && self.md.padded_offsets[..nd] == rhs.md.padded_offsets[..nd]
            && self.offset0() == rhs.offset0()
            && a.strides[..nd] == b.strides[..nd]
            && a.inner_nblks == b.inner_nblks
            && a.inner_blks[..a.inner_nblks] == b.inner_blks[..b.inner_nblks]
            && a.inner_idxs[..a.inner_nblks] == b.inner_idxs[..b.inner_nblks]
    }

    /// True when the layout is exactly what `tag` would produce for these dims.
    pub fn matches_tag(&self, tag: FormatTag) -> bool {
        if !self.is_blocking_desc() || self.offset0() != 0 {
            return false;
        }
        match MemoryDesc::new(self.dims(), self.data_type(), tag) {
            Ok(reference) => {
                reference.format == self.md.format && reference.padded_dims == self.md.padded_dims
            }
            Err(_) => false,
        }
    }

    /// First tag among `tags` this layout matches.
    pub fn matches_one_of_tag(&self, tags: &[FormatTag]) -> Option<FormatTag> {
        tags.iter().copied().find(|&t| self.matches_tag(t))
    }

    /// Layout pattern in tag notation, e.g. `aBcd16b`.
    pub fn format_str(&self) -> String {
        let Some(bd) = self.blocking_desc() else {
            return if self.format_any() { "any" } else { "undef" }.to_string();
        };
        let nd = self.ndims();
        let blocks = self.blocks();
        let mut order: Vec<usize> = (0..nd).collect();
        order.sort_by(|&x, &y| bd.strides[y].cmp(&bd.strides[x]).then(x.cmp(&y)));

        let mut out = String::with_capacity(nd + 4 * bd.inner_nblks);
        for d in order {
            let c = (b'a' + d as u8) as char;
            out.push(if blocks[d] > 1 { c.to_ascii_uppercase() } else { c });
        }
        for i in 0..bd.inner_nblks {
            out.push_str(&bd.inner_blks[i].to_string());
            out.push((b'a' + bd.inner_idxs[i] as u8) as char);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn md(dims: &[Dim], tag: FormatTag) -> MemoryDesc {
        MemoryDesc::new(dims, DataType::F32, tag).unwrap()
    }

    #[test]
    fn test_nelems_and_size_with_padding() {
        let m = md(&[2, 17, 3, 3], FormatTag::N_CHW16C);
        let w = MemoryDescWrapper::new(&m);
        assert_eq!(w.nelems(false), 2 * 17 * 9);
        assert_eq!(w.nelems(true), 2 * 32 * 9);
        assert_eq!(w.size(), 2 * 32 * 9 * 4);
        assert!(w.is_dense(true));
        assert!(!w.is_dense(false));
    }

    #[test]
    fn test_zero_dim() {
        let m = md(&[0, 3, 4], FormatTag::NCW);
        let w = MemoryDescWrapper::new(&m);
        assert!(w.has_zero_dim());
        assert_eq!(w.nelems(false), 0);
        assert_eq!(w.size(), 0);
        let zero = MemoryDesc::zero();
        assert!(!MemoryDescWrapper::new(&zero).has_zero_dim());
    }

    #[test]
    fn test_off_l_plain_is_identity() {
        let m = md(&[2, 3, 4], FormatTag::NCW);
        let w = MemoryDescWrapper::new(&m);
        for l in 0..24 {
            assert_eq!(w.off_l(l), l);
        }
    }

    #[test]
    fn test_off_v_nhwc() {
        let m = md(&[2, 3, 4, 5], FormatTag::NHWC);
        let w = MemoryDescWrapper::new(&m);
        // n=1, c=2, h=3, w=4
        assert_eq!(w.off_v(&[1, 2, 3, 4], false), 60 + 3 * 15 + 4 * 3 + 2);
    }

    #[test]
    fn test_off_v_blocked_channels() {
        let m = md(&[1, 20, 2, 2], FormatTag::N_CHW16C);
        let w = MemoryDescWrapper::new(&m);
        // c=17 lands in the second channel block at lane 1
        assert_eq!(w.off_v(&[0, 17, 1, 0], false), 64 + 2 * 16 + 1);
    }

    #[test]
    fn test_blocked_offsets_are_injective() {
        let m = md(&[3, 20, 3, 2], FormatTag::N_CHW8C);
        let w = MemoryDescWrapper::new(&m);
        let n = w.nelems(false);
        let offs: HashSet<Dim> = (0..n).map(|l| w.off_l(l)).collect();
        assert_eq!(offs.len() as Dim, n);
        assert!(offs.iter().all(|&o| (o as usize) < w.size() / 4));
    }

    #[test]
    fn test_consistent_and_similar() {
        let a = md(&[2, 16, 4, 4], FormatTag::NCHW);
        let b = md(&[2, 16, 4, 4], FormatTag::NHWC);
        let c = md(&[2, 16, 4, 5], FormatTag::NCHW);
        let (wa, wb, wc) = (
            MemoryDescWrapper::new(&a),
            MemoryDescWrapper::new(&b),
            MemoryDescWrapper::new(&c),
        );
        assert!(wa.consistent_with(&wb));
        assert!(!wa.consistent_with(&wc));
        assert!(!wa.similar_to(&wb, true, true));
        let a16 = a.with_data_type(DataType::Bf16);
        let wa16 = MemoryDescWrapper::new(&a16);
        assert!(wa.similar_to(&wa16, true, false));
        assert!(!wa.similar_to(&wa16, true, true));
    }

    #[test]
    fn test_matches_tag() {
        let m = md(&[2, 16, 4, 4], FormatTag::NHWC);
        let w = MemoryDescWrapper::new(&m);
        assert!(w.matches_tag(FormatTag::NHWC));
        assert!(!w.matches_tag(FormatTag::NCHW));
        assert_eq!(
            w.matches_one_of_tag(&[FormatTag::NCHW, FormatTag::NHWC]),
            Some(FormatTag::acdb)
        );
    }

    #[test]
    fn test_strided_view_not_dense() {
        let m = MemoryDesc::with_strides(&[4, 4], DataType::F32, &[8, 1]).unwrap();
        let w = MemoryDescWrapper::new(&m);
        assert!(w.is_plain());
        assert_eq!(w.size(), 32 * 4);
        assert!(!w.is_dense(false));
        assert_eq!(w.off_v(&[1, 2], false), 10);
    }

    #[test]
    fn test_format_str() {
        let m = md(&[8, 8, 3, 3], FormatTag::OIHW4I16O4I);
        assert_eq!(MemoryDescWrapper::new(&m).format_str(), "ABcd4b16a4b");
        let m = md(&[2, 3], FormatTag::CN);
        assert_eq!(MemoryDescWrapper::new(&m).format_str(), "ba");
    }
}
