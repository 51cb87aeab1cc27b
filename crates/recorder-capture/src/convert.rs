//! Pixel format conversion (BT.601, full range).
//!
//! Frame dimensions are expected to be even; the chroma plane is subsampled
//! 2x2.

/// Convert a BGRA image with the given row pitch to NV12.
pub fn bgra_to_nv12(bgra: &[u8], width: u32, height: u32, row_pitch: usize) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;

    // NV12: Y plane followed by interleaved UV plane
    let y_size = w * h;
    let mut nv12 = vec![0u8; y_size + y_size / 2];

    for y in 0..h {
        for x in 0..w {
            let src = y * row_pitch + x * 4;
            let b = bgra[src] as f32;
            let g = bgra[src + 1] as f32;
            let r = bgra[src + 2] as f32;
            nv12[y * w + x] = (0.299 * r + 0.587 * g + 0.114 * b) as u8;
        }
    }

    for y in (0..h).step_by(2) {
        for x in (0..w).step_by(2) {
            let src = y * row_pitch + x * 4;
            let b = bgra[src] as f32;
            let g = bgra[src + 1] as f32;
            let r = bgra[src + 2] as f32;

            let u = ((-0.169 * r - 0.331 * g + 0.500 * b) + 128.0).clamp(0.0, 255.0) as u8;
            let v = ((0.500 * r - 0.419 * g - 0.081 * b) + 128.0).clamp(0.0, 255.0) as u8;

            let uv = y_size + (y / 2) * w + x;
            nv12[uv] = u;
            nv12[uv + 1] = v;
        }
    }

    nv12
}

/// Convert an NV12 image to packed RGB24.
pub fn nv12_to_rgb(nv12: &[u8], width: u32, height: u32) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;
    let y_size = w * h;
    let mut rgb = vec![0u8; y_size * 3];

    for y in 0..h {
        let uv_row = y_size + (y / 2) * w;
        for x in 0..w {
            let luma = nv12[y * w + x] as f32;
            let uv = uv_row + (x & !1);
            let u = nv12[uv] as f32 - 128.0;
            let v = nv12[uv + 1] as f32 - 128.0;

            let out = (y * w + x) * 3;
            rgb[out] = (luma + 1.402 * v).clamp(0.0, 255.0) as u8;
            rgb[out + 1] = (luma - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
            rgb[out + 2] = (luma + 1.772 * u).clamp(0.0, 255.0) as u8;
        }
    }

    rgb
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_bgra(width: u32, height: u32, bgr: [u8; 3]) -> Vec<u8> {
        (0..width * height)
            .flat_map(|_| [bgr[0], bgr[1], bgr[2], 255])
            .collect()
    }

    #[test]
    fn gray_stays_neutral() {
        let bgra = solid_bgra(4, 2, [128, 128, 128]);
        let nv12 = bgra_to_nv12(&bgra, 4, 2, 16);
        assert_eq!(nv12.len(), 12);
        assert!(nv12[..8].iter().all(|&y| (127..=128).contains(&y)));
        assert!(nv12[8..].iter().all(|&c| (127..=128).contains(&c)));
    }

    #[test]
    fn row_pitch_padding_is_skipped() {
        let mut bgra = Vec::new();
        for _ in 0..2 {
            bgra.extend(solid_bgra(2, 1, [0, 0, 255]));
            bgra.extend([9u8; 8]);
        }
        let nv12 = bgra_to_nv12(&bgra, 2, 2, 16);
        assert!(nv12[..4].iter().all(|&y| y == nv12[0]));
    }

    #[test]
    fn rgb_round_trip_is_close() {
        let bgra = solid_bgra(2, 2, [40, 160, 220]);
        let rgb = nv12_to_rgb(&bgra_to_nv12(&bgra, 2, 2, 8), 2, 2);
        for (got, want) in rgb[..3].iter().zip([220u8, 160, 40]) {
            assert!((*got as i32 - want as i32).abs() <= 4, "{got} vs {want}");
        }
    }
}
