//! Low-latency SPS rewrite.
//!
//! The console encodes with a reference picture budget sized for its own
//! buffering model. On a handheld decoder every extra reference frame is
//! another frame of display latency, so on the first access unit of a new
//! stream the pipeline rewrites the SPS: `max_num_ref_frames` and, when a
//! VUI bitstream restriction is present, `vui.max_dec_frame_buffering`
//! both become [`LOW_LATENCY_REF_FRAMES`].
//!
//! The rewrite is a copy-while-parsing pass over the RBSP: every syntax
//! element up to the target field is re-emitted verbatim, the target is
//! replaced, and the remaining bits are copied through. Emulation
//! prevention bytes are stripped on the way in and re-inserted on the way
//! out. A truncated or otherwise unparseable SPS aborts the patch and the
//! unit is delivered unmodified — a bad rewrite is worse than extra
//! latency.

use tracing::debug;

use super::{NAL_TYPE_SPS, nal_ranges};

/// Reference frame budget written into the SPS.
pub const LOW_LATENCY_REF_FRAMES: u32 = 2;

/// One-shot SPS patcher, applied to the first access unit of a session
/// that carries an SPS.
#[derive(Debug, Default)]
pub struct SpsPatcher {
    done: bool,
}

impl SpsPatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Patch `data` if this is the first SPS seen. Returns the rewritten
    /// access unit, or `None` when the unit should be delivered as-is.
    pub fn maybe_patch(&mut self, data: &[u8]) -> Option<Vec<u8>> {
        if self.done {
            return None;
        }
        let patched = patch_access_unit(data, LOW_LATENCY_REF_FRAMES);
        if let Some((_, old_refs)) = &patched {
            debug!(
                old_refs,
                new_refs = LOW_LATENCY_REF_FRAMES,
                "PIPE/sps: rewrote reference budget"
            );
            self.done = true;
        }
        patched.map(|(data, _)| data)
    }
}

/// Rewrite the first SPS NAL in an Annex B access unit.
///
/// Returns the rebuilt unit and the previous `max_num_ref_frames`, or
/// `None` when no SPS is present or the SPS does not parse.
pub fn patch_access_unit(data: &[u8], max_refs: u32) -> Option<(Vec<u8>, u32)> {
    let ranges = nal_ranges(data);
    let sps = ranges.iter().find(|r| r.nal_type(data) == NAL_TYPE_SPS)?;

    let header = data[sps.start];
    let rbsp = unescape_rbsp(&data[sps.start + 1..sps.end]);
    let (patched_rbsp, old_refs) = patch_sps_rbsp(&rbsp, max_refs)?;

    let mut out = Vec::with_capacity(data.len() + 4);
    out.extend_from_slice(&data[..sps.start]);
    out.push(header);
    out.extend_from_slice(&escape_rbsp(&patched_rbsp));
    out.extend_from_slice(&data[sps.end..]);
    Some((out, old_refs))
}

/// Strip emulation prevention bytes (`00 00 03` → `00 00`).
fn unescape_rbsp(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0usize;
    for (i, &b) in data.iter().enumerate() {
        if zeros >= 2 && b == 0x03 && data.get(i + 1).is_none_or(|&n| n <= 0x03) {
            zeros = 0;
            continue;
        }
        out.push(b);
        zeros = if b == 0 { zeros + 1 } else { 0 };
    }
    out
}

/// Re-insert emulation prevention bytes.
fn escape_rbsp(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 16);
    let mut zeros = 0usize;
    for &b in data {
        if zeros >= 2 && b <= 0x03 {
            out.push(0x03);
            zeros = 0;
        }
        out.push(b);
        zeros = if b == 0 { zeros + 1 } else { 0 };
    }
    out
}

struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() * 8 - self.pos
    }

    fn read_bit(&mut self) -> Option<u32> {
        let byte = *self.data.get(self.pos / 8)?;
        let bit = (byte >> (7 - (self.pos % 8))) & 1;
        self.pos += 1;
        Some(bit as u32)
    }

    fn read_bits(&mut self, n: usize) -> Option<u32> {
        let mut v = 0u32;
        for _ in 0..n {
            v = (v << 1) | self.read_bit()?;
        }
        Some(v)
    }

    fn read_ue(&mut self) -> Option<u32> {
        let mut zeros = 0usize;
        while self.read_bit()? == 0 {
            zeros += 1;
            if zeros > 31 {
                return None;
            }
        }
        let rest = self.read_bits(zeros)?;
        Some((1u32 << zeros) - 1 + rest)
    }

    fn read_se(&mut self) -> Option<i32> {
        let v = self.read_ue()?;
        let magnitude = v.div_ceil(2) as i32;
        Some(if v % 2 == 1 { magnitude } else { -magnitude })
    }
}

#[derive(Default)]
struct BitWriter {
    buf: Vec<u8>,
    bits: usize,
}

impl BitWriter {
    fn write_bit(&mut self, bit: u32) {
        if self.bits % 8 == 0 {
            self.buf.push(0);
        }
        if bit != 0 {
            let idx = self.bits / 8;
            self.buf[idx] |= 1 << (7 - (self.bits % 8));
        }
        self.bits += 1;
    }

    fn write_bits(&mut self, v: u32, n: usize) {
        for i in (0..n).rev() {
            self.write_bit((v >> i) & 1);
        }
    }

    fn write_ue(&mut self, v: u32) {
        let coded = v + 1;
        let len = 32 - coded.leading_zeros() as usize;
        self.write_bits(0, len - 1);
        self.write_bits(coded, len);
    }

    fn write_se(&mut self, v: i32) {
        let coded = if v > 0 {
            (v as u32) * 2 - 1
        } else {
            (-v as u32) * 2
        };
        self.write_ue(coded);
    }

    /// Finished RBSP, zero-padded to a byte boundary.
    fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Copy-while-parsing cursor over an SPS RBSP.
struct Rewriter<'a> {
    r: BitReader<'a>,
    w: BitWriter,
}

impl<'a> Rewriter<'a> {
    fn copy_bits(&mut self, n: usize) -> Option<u32> {
        let v = self.r.read_bits(n)?;
        self.w.write_bits(v, n);
        Some(v)
    }

    fn copy_ue(&mut self) -> Option<u32> {
        let v = self.r.read_ue()?;
        self.w.write_ue(v);
        Some(v)
    }

    fn copy_se(&mut self) -> Option<i32> {
        let v = self.r.read_se()?;
        self.w.write_se(v);
        Some(v)
    }

    /// Read a ue(v) element but write `new` in its place. Returns the old
    /// value.
    fn replace_ue(&mut self, new: u32) -> Option<u32> {
        let old = self.r.read_ue()?;
        self.w.write_ue(new);
        Some(old)
    }

    /// Copy everything left in the reader (including the rbsp stop bit).
    fn copy_rest(&mut self) {
        while self.r.remaining() > 0 {
            let bit = self.r.read_bit().unwrap();
            self.w.write_bit(bit);
        }
    }

    fn copy_scaling_list(&mut self, size: usize) -> Option<()> {
        let mut last_scale = 8i32;
        let mut next_scale = 8i32;
        for _ in 0..size {
            if next_scale != 0 {
                let delta = self.copy_se()?;
                next_scale = (last_scale + delta + 256) % 256;
            }
            if next_scale != 0 {
                last_scale = next_scale;
            }
        }
        Some(())
    }

    fn copy_hrd_parameters(&mut self) -> Option<()> {
        let cpb_cnt_minus1 = self.copy_ue()?;
        if cpb_cnt_minus1 > 31 {
            return None;
        }
        self.copy_bits(4)?; // bit_rate_scale
        self.copy_bits(4)?; // cpb_size_scale
        for _ in 0..=cpb_cnt_minus1 {
            self.copy_ue()?; // bit_rate_value_minus1
            self.copy_ue()?; // cpb_size_value_minus1
            self.copy_bits(1)?; // cbr_flag
        }
        // *_delay_length_minus1 ×3 + time_offset_length
        self.copy_bits(20)?;
        Some(())
    }
}

/// Rewrite `max_num_ref_frames` (and `max_dec_frame_buffering` when the
/// VUI carries one) in an unescaped SPS RBSP.
///
/// Returns the rewritten RBSP and the previous `max_num_ref_frames`.
fn patch_sps_rbsp(rbsp: &[u8], max_refs: u32) -> Option<(Vec<u8>, u32)> {
    let mut c = Rewriter {
        r: BitReader::new(rbsp),
        w: BitWriter::default(),
    };

    let profile_idc = c.copy_bits(8)?;
    c.copy_bits(8)?; // constraint flags + reserved
    c.copy_bits(8)?; // level_idc
    c.copy_ue()?; // seq_parameter_set_id

    let mut chroma_format_idc = 1;
    if matches!(
        profile_idc,
        100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134 | 135
    ) {
        chroma_format_idc = c.copy_ue()?;
        if chroma_format_idc == 3 {
            c.copy_bits(1)?; // separate_colour_plane_flag
        }
        c.copy_ue()?; // bit_depth_luma_minus8
        c.copy_ue()?; // bit_depth_chroma_minus8
        c.copy_bits(1)?; // qpprime_y_zero_transform_bypass_flag
        let scaling_matrix_present = c.copy_bits(1)?;
        if scaling_matrix_present == 1 {
            let lists = if chroma_format_idc == 3 { 12 } else { 8 };
            for i in 0..lists {
                let present = c.copy_bits(1)?;
                if present == 1 {
                    c.copy_scaling_list(if i < 6 { 16 } else { 64 })?;
                }
            }
        }
    }

    c.copy_ue()?; // log2_max_frame_num_minus4
    let pic_order_cnt_type = c.copy_ue()?;
    match pic_order_cnt_type {
        0 => {
            c.copy_ue()?; // log2_max_pic_order_cnt_lsb_minus4
        }
        1 => {
            c.copy_bits(1)?; // delta_pic_order_always_zero_flag
            c.copy_se()?; // offset_for_non_ref_pic
            c.copy_se()?; // offset_for_top_to_bottom_field
            let cycles = c.copy_ue()?;
            if cycles > 255 {
                return None;
            }
            for _ in 0..cycles {
                c.copy_se()?;
            }
        }
        _ => {}
    }

    let old_refs = c.replace_ue(max_refs)?;

    c.copy_bits(1)?; // gaps_in_frame_num_value_allowed_flag
    c.copy_ue()?; // pic_width_in_mbs_minus1
    c.copy_ue()?; // pic_height_in_map_units_minus1
    let frame_mbs_only = c.copy_bits(1)?;
    if frame_mbs_only == 0 {
        c.copy_bits(1)?; // mb_adaptive_frame_field_flag
    }
    c.copy_bits(1)?; // direct_8x8_inference_flag
    let cropping = c.copy_bits(1)?;
    if cropping == 1 {
        for _ in 0..4 {
            c.copy_ue()?;
        }
    }

    let vui_present = c.copy_bits(1)?;
    if vui_present == 1 {
        patch_vui(&mut c, max_refs)?;
    }

    c.copy_rest();
    Some((c.w.into_bytes(), old_refs))
}

fn patch_vui(c: &mut Rewriter<'_>, max_refs: u32) -> Option<()> {
    if c.copy_bits(1)? == 1 {
        // aspect_ratio_info
        let idc = c.copy_bits(8)?;
        if idc == 255 {
            c.copy_bits(32)?; // sar width + height
        }
    }
    if c.copy_bits(1)? == 1 {
        c.copy_bits(1)?; // overscan_appropriate_flag
    }
    if c.copy_bits(1)? == 1 {
        // video_signal_type
        c.copy_bits(4)?; // video_format + full_range
        if c.copy_bits(1)? == 1 {
            c.copy_bits(24)?; // colour description
        }
    }
    if c.copy_bits(1)? == 1 {
        // chroma_loc_info
        c.copy_ue()?;
        c.copy_ue()?;
    }
    if c.copy_bits(1)? == 1 {
        // timing_info
        c.copy_bits(32)?;
        c.copy_bits(32)?;
        c.copy_bits(1)?;
    }
    let nal_hrd = c.copy_bits(1)?;
    if nal_hrd == 1 {
        c.copy_hrd_parameters()?;
    }
    let vcl_hrd = c.copy_bits(1)?;
    if vcl_hrd == 1 {
        c.copy_hrd_parameters()?;
    }
    if nal_hrd == 1 || vcl_hrd == 1 {
        c.copy_bits(1)?; // low_delay_hrd_flag
    }
    c.copy_bits(1)?; // pic_struct_present_flag
    if c.copy_bits(1)? == 1 {
        // bitstream_restriction
        c.copy_bits(1)?; // motion_vectors_over_pic_boundaries_flag
        c.copy_ue()?; // max_bytes_per_pic_denom
        c.copy_ue()?; // max_bits_per_mb_denom
        c.copy_ue()?; // log2_max_mv_length_horizontal
        c.copy_ue()?; // log2_max_mv_length_vertical
        c.copy_ue()?; // max_num_reorder_frames
        c.replace_ue(max_refs)?; // max_dec_frame_buffering
    }
    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a minimal baseline-profile SPS RBSP with the given reference
    /// budget and optional VUI bitstream restriction.
    fn build_sps(max_refs: u32, with_vui_restriction: bool) -> Vec<u8> {
        let mut w = BitWriter::default();
        w.write_bits(66, 8); // profile_idc: baseline
        w.write_bits(0, 8); // constraint flags
        w.write_bits(31, 8); // level_idc
        w.write_ue(0); // seq_parameter_set_id
        w.write_ue(0); // log2_max_frame_num_minus4
        w.write_ue(0); // pic_order_cnt_type 0
        w.write_ue(0); // log2_max_pic_order_cnt_lsb_minus4
        w.write_ue(max_refs); // max_num_ref_frames
        w.write_bits(0, 1); // gaps_in_frame_num_value_allowed
        w.write_ue(59); // pic_width_in_mbs_minus1 (960)
        w.write_ue(33); // pic_height_in_map_units_minus1 (544)
        w.write_bits(1, 1); // frame_mbs_only
        w.write_bits(0, 1); // direct_8x8_inference
        w.write_bits(0, 1); // frame_cropping
        if with_vui_restriction {
            w.write_bits(1, 1); // vui_parameters_present
            w.write_bits(0, 1); // aspect_ratio_info_present
            w.write_bits(0, 1); // overscan_info_present
            w.write_bits(0, 1); // video_signal_type_present
            w.write_bits(0, 1); // chroma_loc_info_present
            w.write_bits(0, 1); // timing_info_present
            w.write_bits(0, 1); // nal_hrd_parameters_present
            w.write_bits(0, 1); // vcl_hrd_parameters_present
            w.write_bits(0, 1); // pic_struct_present
            w.write_bits(1, 1); // bitstream_restriction
            w.write_bits(1, 1); // motion_vectors_over_pic_boundaries
            w.write_ue(0); // max_bytes_per_pic_denom
            w.write_ue(0); // max_bits_per_mb_denom
            w.write_ue(9); // log2_max_mv_length_horizontal
            w.write_ue(9); // log2_max_mv_length_vertical
            w.write_ue(max_refs); // max_num_reorder_frames
            w.write_ue(max_refs); // max_dec_frame_buffering
        } else {
            w.write_bits(0, 1); // vui_parameters_present
        }
        w.write_bits(1, 1); // rbsp stop bit
        w.into_bytes()
    }

    fn build_access_unit(sps_rbsp: &[u8]) -> Vec<u8> {
        let mut au = vec![0, 0, 0, 1, 0x67];
        au.extend_from_slice(&escape_rbsp(sps_rbsp));
        au.extend_from_slice(&[0, 0, 0, 1, 0x68, 0xCE, 0x38, 0x80]); // PPS
        au.extend_from_slice(&[0, 0, 0, 1, 0x65, 0x88, 0x80, 0x10]); // IDR slice
        au
    }

    #[test]
    fn rewrites_ref_frames() {
        let au = build_access_unit(&build_sps(6, false));
        let (patched, old) = patch_access_unit(&au, 2).expect("patch");
        assert_eq!(old, 6);
        // Patching the patched unit reads back the new value.
        let (_, now) = patch_access_unit(&patched, 2).expect("re-patch");
        assert_eq!(now, 2);
    }

    #[test]
    fn rewrites_vui_dec_frame_buffering() {
        let au = build_access_unit(&build_sps(6, true));
        let (patched, old) = patch_access_unit(&au, 2).expect("patch");
        assert_eq!(old, 6);
        let (again, now) = patch_access_unit(&patched, 2).expect("re-patch");
        assert_eq!(now, 2);
        // Idempotent once the values are in place.
        assert_eq!(patched, again);
    }

    #[test]
    fn preserves_other_nals() {
        let au = build_access_unit(&build_sps(4, false));
        let (patched, _) = patch_access_unit(&au, 2).expect("patch");
        assert!(contains_pps_and_idr(&patched));
    }

    fn contains_pps_and_idr(data: &[u8]) -> bool {
        let ranges = nal_ranges(data);
        ranges.iter().any(|r| r.nal_type(data) == 8) && ranges.iter().any(|r| r.nal_type(data) == 5)
    }

    #[test]
    fn no_sps_returns_none() {
        let au = [0u8, 0, 0, 1, 0x65, 0x88, 0x80];
        assert!(patch_access_unit(&au, 2).is_none());
    }

    #[test]
    fn truncated_sps_returns_none() {
        let au = [0u8, 0, 0, 1, 0x67, 0x42];
        assert!(patch_access_unit(&au, 2).is_none());
    }

    #[test]
    fn escape_roundtrip() {
        let raw = vec![0x00, 0x00, 0x01, 0x42, 0x00, 0x00, 0x00, 0x03, 0xFF];
        let escaped = escape_rbsp(&raw);
        assert_eq!(unescape_rbsp(&escaped), raw);
        // The escaped form never contains a raw 00 00 0x with x <= 3.
        for win in escaped.windows(3) {
            assert!(!(win[0] == 0 && win[1] == 0 && win[2] <= 0x02));
        }
    }

    #[test]
    fn patcher_is_one_shot() {
        let mut patcher = SpsPatcher::new();
        let au = build_access_unit(&build_sps(5, false));
        assert!(patcher.maybe_patch(&au).is_some());
        assert!(patcher.maybe_patch(&au).is_none());
    }

    #[test]
    fn patcher_skips_units_without_sps_until_one_arrives() {
        let mut patcher = SpsPatcher::new();
        let plain = [0u8, 0, 0, 1, 0x41, 0x9A];
        assert!(patcher.maybe_patch(&plain).is_none());
        let au = build_access_unit(&build_sps(5, false));
        assert!(patcher.maybe_patch(&au).is_some());
    }

    #[test]
    fn bit_reader_ue_values() {
        // ue: 0 -> "1", 1 -> "010", 2 -> "011", 3 -> "00100"
        let mut w = BitWriter::default();
        for v in [0u32, 1, 2, 3, 14, 255] {
            w.write_ue(v);
        }
        w.write_bits(1, 1);
        let bytes = w.into_bytes();
        let mut r = BitReader::new(&bytes);
        for v in [0u32, 1, 2, 3, 14, 255] {
            assert_eq!(r.read_ue(), Some(v));
        }
    }

    #[test]
    fn bit_reader_se_values() {
        let mut w = BitWriter::default();
        for v in [0i32, 1, -1, 7, -7] {
            w.write_se(v);
        }
        w.write_bits(1, 1);
        let bytes = w.into_bytes();
        let mut r = BitReader::new(&bytes);
        for v in [0i32, 1, -1, 7, -7] {
            assert_eq!(r.read_se(), Some(v));
        }
    }
}
