//! Sparse transform-mask artifacts: the `.npz` loader and the mock
//! generator that exercises the CLI's `gen-masks` mode.
//!
//! The artifact format is fixed by the (out-of-scope) mask generator
//! tool's contract: a zip container (`numpy.savez_compressed`) holding
//! five flat arrays — `shape`, `idx0..idx3`, `values`, `mask_fraction` —
//! each stored as a standalone `.npy` entry. Only the narrow subset of the
//! `.npy` format actually produced by that contract is supported: little-
//! endian `i4`/`f4` dtypes, C order, one-dimensional (or length-4 for
//! `shape`) arrays.

use std::io::{Cursor, Read, Write};
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::SimError;

/// A loaded sparse mask for one RF layer: shape `(C_out, C_in, mu, mu)`
/// plus the nonzero coordinate list. Immutable after load.
#[derive(Clone, Debug)]
pub struct SparseMask {
    pub shape: [usize; 4],
    /// `(o, i, m0, m1)` per nonzero, length N.
    pub coords: Vec<[u32; 4]>,
    pub values: Vec<f32>,
    pub mask_fraction: f32,
}

impl SparseMask {
    pub fn nonzero_count(&self) -> usize {
        self.coords.len()
    }
}

/// Parses one little-endian `.npy` buffer into its raw bytes and declared
/// shape/dtype, returning the payload slice positioned at the data start.
struct NpyView<'a> {
    dtype: String,
    shape: Vec<usize>,
    data: &'a [u8],
}

fn parse_npy(bytes: &[u8], entry_name: &str) -> Result<NpyView<'_>, SimError> {
    let corrupt = |reason: &str| SimError::MaskCorrupt {
        path: entry_name.to_string(),
        reason: reason.to_string(),
    };
    if bytes.len() < 10 || &bytes[0..6] != b"\x93NUMPY" {
        return Err(corrupt("missing .npy magic"));
    }
    let major = bytes[6];
    let (header_len, header_start) = if major == 1 {
        let len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        (len, 10)
    } else {
        if bytes.len() < 12 {
            return Err(corrupt("truncated .npy header"));
        }
        let len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
        (len, 12)
    };
    let header_end = header_start + header_len;
    if bytes.len() < header_end {
        return Err(corrupt("truncated .npy header"));
    }
    let header = std::str::from_utf8(&bytes[header_start..header_end])
        .map_err(|_| corrupt("non-utf8 .npy header"))?;

    let dtype = extract_field(header, "descr").ok_or_else(|| corrupt("missing descr field"))?;
    let fortran = extract_field(header, "fortran_order").unwrap_or_else(|| "False".into());
    if fortran.trim() != "False" {
        return Err(corrupt("fortran-ordered arrays are not supported"));
    }
    let shape_str = extract_shape(header).ok_or_else(|| corrupt("missing shape field"))?;
    let shape: Vec<usize> = shape_str
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>().map_err(|_| corrupt("malformed shape entry")))
        .collect::<Result<_, _>>()?;

    Ok(NpyView {
        dtype,
        shape,
        data: &bytes[header_end..],
    })
}

fn extract_field(header: &str, key: &str) -> Option<String> {
    let pat = format!("'{key}':");
    let pos = header.find(&pat)?;
    let rest = &header[pos + pat.len()..];
    let rest = rest.trim_start();
    if let Some(stripped) = rest.strip_prefix('\'') {
        let end = stripped.find('\'')?;
        Some(stripped[..end].to_string())
    } else {
        let end = rest.find(',').unwrap_or(rest.len());
        Some(rest[..end].trim_end_matches('}').trim().to_string())
    }
}

fn extract_shape(header: &str) -> Option<String> {
    let pos = header.find("'shape':")?;
    let rest = &header[pos + "'shape':".len()..];
    let start = rest.find('(')? + 1;
    let end = rest.find(')')?;
    Some(rest[start..end].to_string())
}

fn read_i32_array(view: &NpyView, entry_name: &str) -> Result<Vec<i32>, SimError> {
    if view.dtype != "<i4" {
        return Err(SimError::MaskCorrupt {
            path: entry_name.to_string(),
            reason: format!("expected <i4, got {}", view.dtype),
        });
    }
    Ok(view
        .data
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn read_f32_array(view: &NpyView, entry_name: &str) -> Result<Vec<f32>, SimError> {
    if view.dtype != "<f4" {
        return Err(SimError::MaskCorrupt {
            path: entry_name.to_string(),
            reason: format!("expected <f4, got {}", view.dtype),
        });
    }
    Ok(view
        .data
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Loads `<mask_dir>/<layer_name>.npz`. Returns `Ok(None)` when the file is
/// simply absent, which the caller treats as a signal to fall back to the
/// analytic cost model; returns `Err` only for a present-but-corrupt
/// archive, which the caller logs and also falls back from.
pub fn load_sparse_mask(mask_dir: &Path, layer_name: &str) -> Result<Option<SparseMask>, SimError> {
    let path = mask_dir.join(format!("{layer_name}.npz"));
    if !path.exists() {
        return Ok(None);
    }
    let file = std::fs::File::open(&path).map_err(|e| SimError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| SimError::MaskCorrupt {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let mut read_entry = |name: &str| -> Result<Vec<u8>, SimError> {
        let mut f = archive.by_name(name).map_err(|_| SimError::MaskCorrupt {
            path: path.display().to_string(),
            reason: format!("missing entry {name}"),
        })?;
        let mut buf = Vec::new();
        f.read_to_end(&mut buf).map_err(|e| SimError::MaskCorrupt {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(buf)
    };

    let shape_bytes = read_entry("shape.npy")?;
    let shape_view = parse_npy(&shape_bytes, "shape.npy")?;
    let shape_vals = read_i32_array(&shape_view, "shape.npy")?;
    if shape_vals.len() != 4 {
        return Err(SimError::MaskCorrupt {
            path: path.display().to_string(),
            reason: "shape array must have 4 entries".into(),
        });
    }
    let shape = [
        shape_vals[0] as usize,
        shape_vals[1] as usize,
        shape_vals[2] as usize,
        shape_vals[3] as usize,
    ];

    let mut idxs: [Vec<i32>; 4] = Default::default();
    for (k, slot) in idxs.iter_mut().enumerate() {
        let name = format!("idx{k}.npy");
        let bytes = read_entry(&name)?;
        let view = parse_npy(&bytes, &name)?;
        *slot = read_i32_array(&view, &name)?;
    }
    let n = idxs[0].len();
    if idxs.iter().any(|a| a.len() != n) {
        return Err(SimError::MaskCorrupt {
            path: path.display().to_string(),
            reason: "idx arrays have mismatched lengths".into(),
        });
    }

    let values_bytes = read_entry("values.npy")?;
    let values_view = parse_npy(&values_bytes, "values.npy")?;
    let values = read_f32_array(&values_view, "values.npy")?;
    if values.len() != n {
        return Err(SimError::MaskCorrupt {
            path: path.display().to_string(),
            reason: "values length does not match idx length".into(),
        });
    }

    let frac_bytes = read_entry("mask_fraction.npy")?;
    let frac_view = parse_npy(&frac_bytes, "mask_fraction.npy")?;
    let frac = read_f32_array(&frac_view, "mask_fraction.npy")?
        .first()
        .copied()
        .unwrap_or_else(|| {
            let total: usize = shape.iter().product();
            if total == 0 {
                0.0
            } else {
                n as f32 / total as f32
            }
        });

    let coords = (0..n)
        .map(|j| [idxs[0][j] as u32, idxs[1][j] as u32, idxs[2][j] as u32, idxs[3][j] as u32])
        .collect();

    Ok(Some(SparseMask {
        shape,
        coords,
        values,
        mask_fraction: frac,
    }))
}

fn write_npy_i32(zip: &mut zip::ZipWriter<std::fs::File>, name: &str, data: &[i32]) -> Result<(), SimError> {
    write_npy(zip, name, "<i4", &[data.len()], |buf| {
        for v in data {
            buf.extend_from_slice(&v.to_le_bytes());
        }
    })
}

fn write_npy_f32(zip: &mut zip::ZipWriter<std::fs::File>, name: &str, data: &[f32]) -> Result<(), SimError> {
    write_npy(zip, name, "<f4", &[data.len()], |buf| {
        for v in data {
            buf.extend_from_slice(&v.to_le_bytes());
        }
    })
}

fn write_npy(
    zip: &mut zip::ZipWriter<std::fs::File>,
    name: &str,
    dtype: &str,
    shape: &[usize],
    fill: impl FnOnce(&mut Vec<u8>),
) -> Result<(), SimError> {
    let shape_str = if shape.len() == 1 {
        format!("({},)", shape[0])
    } else {
        format!(
            "({})",
            shape.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(", ")
        )
    };
    let mut header = format!(
        "{{'descr': '{dtype}', 'fortran_order': False, 'shape': {shape_str}, }}"
    );
    // Pad so (magic + version + header_len field + header) is a multiple of 64.
    let prefix_len = 10usize;
    let pad = (64 - (prefix_len + header.len() + 1) % 64) % 64;
    header.push_str(&" ".repeat(pad));
    header.push('\n');

    let mut out = Vec::with_capacity(prefix_len + header.len());
    out.extend_from_slice(b"\x93NUMPY");
    out.push(1);
    out.push(0);
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    fill(&mut out);

    zip.start_file(name, zip::write::FileOptions::default())
        .map_err(|e| SimError::Config(e.to_string()))?;
    zip.write_all(&out).map_err(|e| SimError::Config(e.to_string()))?;
    Ok(())
}

/// RNG-driven mock transform mask, grounded in
/// `original_source/Sim/vcnpu.py::generate_mock_transform_masks`: draw a
/// Laplace-ish weight tensor scaled per output/input channel, keep the
/// `keep_fraction` largest magnitudes, and write the surviving coordinates
/// and values back out in the same `.npz` layout the loader expects.
pub fn generate_mock_mask(
    out_path: &Path,
    c_out: usize,
    c_in: usize,
    mu: usize,
    keep_fraction: f64,
    seed: u64,
) -> Result<(), SimError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let total = c_out * c_in * mu * mu;
    let scales_out: Vec<f32> = (0..c_out).map(|_| 0.5 + rng.gen::<f32>()).collect();
    let scales_in: Vec<f32> = (0..c_in).map(|_| 0.5 + rng.gen::<f32>()).collect();

    let mut magnitudes = Vec::with_capacity(total);
    let mut raw = Vec::with_capacity(total);
    for o in 0..c_out {
        for i in 0..c_in {
            for m0 in 0..mu {
                for m1 in 0..mu {
                    let u: f32 = rng.gen_range(-0.4999..0.4999);
                    let laplace = -u.signum() * (1.0 - 2.0 * u.abs()).ln();
                    let v = laplace * scales_out[o] * scales_in[i];
                    raw.push(([o as u32, i as u32, m0 as u32, m1 as u32], v));
                    magnitudes.push(v.abs());
                }
            }
        }
    }
    let keep = ((total as f64) * keep_fraction).ceil() as usize;
    let keep = keep.min(total);
    let mut order: Vec<usize> = (0..total).collect();
    order.sort_by(|&a, &b| magnitudes[b].partial_cmp(&magnitudes[a]).unwrap());
    let mut kept: Vec<usize> = order.into_iter().take(keep).collect();
    kept.sort();

    let idx0: Vec<i32> = kept.iter().map(|&k| raw[k].0[0] as i32).collect();
    let idx1: Vec<i32> = kept.iter().map(|&k| raw[k].0[1] as i32).collect();
    let idx2: Vec<i32> = kept.iter().map(|&k| raw[k].0[2] as i32).collect();
    let idx3: Vec<i32> = kept.iter().map(|&k| raw[k].0[3] as i32).collect();
    let values: Vec<f32> = kept.iter().map(|&k| raw[k].1).collect();
    let mask_fraction = values.len() as f32 / total as f32;

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| SimError::Io {
            path: parent.display().to_string(),
            source: e,
        })?;
    }
    let file = std::fs::File::create(out_path).map_err(|e| SimError::Io {
        path: out_path.display().to_string(),
        source: e,
    })?;
    let mut zip = zip::ZipWriter::new(file);
    write_npy_i32(&mut zip, "shape.npy", &[c_out as i32, c_in as i32, mu as i32, mu as i32])?;
    write_npy_i32(&mut zip, "idx0.npy", &idx0)?;
    write_npy_i32(&mut zip, "idx1.npy", &idx1)?;
    write_npy_i32(&mut zip, "idx2.npy", &idx2)?;
    write_npy_i32(&mut zip, "idx3.npy", &idx3)?;
    write_npy_f32(&mut zip, "values.npy", &values)?;
    write_npy_f32(&mut zip, "mask_fraction.npy", &[mask_fraction])?;
    zip.finish().map_err(|e| SimError::Config(e.to_string()))?;
    Ok(())
}

/// Generates mock masks for every RF layer in `layers` under `outdir`.
pub fn generate_mock_masks_for_layers(
    outdir: &Path,
    layers: &[crate::layer::LayerSpec],
    seed: u64,
) -> Result<usize, SimError> {
    let mut written = 0;
    for layer in layers {
        let (mu, rho) = match layer.kind {
            crate::layer::LayerKind::RFConv(p) => (p.mu, p.rho),
            crate::layer::LayerKind::RFDeConv(p) => (p.mu, p.rho),
            _ => continue,
        };
        let path = outdir.join(format!("{}.npz", layer.name));
        generate_mock_mask(
            &path,
            layer.c_out,
            layer.c_in,
            mu as usize,
            rho,
            seed.wrapping_add(written as u64),
        )?;
        written += 1;
    }
    Ok(written)
}

/// Round-trip helper used by tests: parses a buffer already in memory.
#[cfg(test)]
fn parse_npy_owned(bytes: Vec<u8>) -> Result<(String, Vec<usize>), SimError> {
    let view = parse_npy(&bytes, "<buffer>")?;
    Ok((view.dtype, view.shape))
}
