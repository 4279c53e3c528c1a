//! Byte-exact chunk file codec.
//!
//! One file per chunk, named `<base_dir>/<x>_<y>_<z>`. All integer fields
//! are little-endian u32.
//!
//! ```text
//! offset 0   u32      version (currently 1)
//! offset 4   u32      edge length (must match the volume)
//! offset 8   u32      layer count (present layers only)
//! offset 12  44 * n   layer directory
//! ...        payloads at the absolute offsets named by the directory
//! ```
//!
//! Directory entry: 32-byte NUL-padded name, u32 voxel size, u32 revision,
//! u32 absolute payload offset. Payloads follow in registration order among
//! present layers; the per-layer codec callbacks run payload-wide.
//!
//! Decoding is forgiving about layer membership and strict about structure:
//! file layers not registered in the volume are ignored, registered layers
//! whose `{voxel_size, revision}` disagree with the file are skipped, and
//! any structural error fails the whole decode.

use std::fs;
use std::path::{Path, PathBuf};

use crate::persistence::PersistenceError;
use crate::world::core::{ChunkPos, LayerDesc, MAX_LAYER_NAME_LEN};

/// Current file format version.
pub const CHUNK_FILE_VERSION: u32 = 1;

const HEADER_LEN: usize = 12;
const NAME_FIELD_LEN: usize = MAX_LAYER_NAME_LEN + 1;
const DIR_ENTRY_LEN: usize = NAME_FIELD_LEN + 12;

/// Path of the chunk file for `pos` under `base_dir`.
pub fn chunk_file_name(base_dir: &Path, pos: ChunkPos) -> PathBuf {
    base_dir.join(format!("{}_{}_{}", pos.x, pos.y, pos.z))
}

struct FileLayer {
    name: Vec<u8>,
    voxel_size: u32,
    revision: u32,
    file_offset: u32,
}

fn read_u32(data: &[u8], offset: usize, what: &'static str) -> Result<u32, PersistenceError> {
    let bytes = data
        .get(offset..offset + 4)
        .ok_or(PersistenceError::Truncated(what))?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Decode the chunk file at `path` against the given layer registry.
///
/// Returns one buffer slot per registered layer, `None` where the file does
/// not provide the layer (or provides it with a mismatching voxel size or
/// revision).
pub fn read_chunk(
    path: &Path,
    layers: &[LayerDesc],
    edge: u32,
    voxels_per_chunk: usize,
) -> Result<Vec<Option<Box<[u8]>>>, PersistenceError> {
    let data = fs::read(path)?;

    let version = read_u32(&data, 0, "header")?;
    if version != CHUNK_FILE_VERSION {
        return Err(PersistenceError::VersionMismatch { found: version });
    }
    let file_edge = read_u32(&data, 4, "header")?;
    if file_edge != edge {
        return Err(PersistenceError::EdgeLengthMismatch {
            found: file_edge,
            expected: edge,
        });
    }
    let layer_count = read_u32(&data, 8, "header")? as usize;

    let dir_len = layer_count
        .checked_mul(DIR_ENTRY_LEN)
        .ok_or(PersistenceError::Truncated("layer directory"))?;
    if HEADER_LEN + dir_len > data.len() {
        return Err(PersistenceError::Truncated("layer directory"));
    }

    let mut file_layers = Vec::with_capacity(layer_count);
    for i in 0..layer_count {
        let base = HEADER_LEN + i * DIR_ENTRY_LEN;
        let name_field = &data[base..base + NAME_FIELD_LEN];
        let name_len = name_field
            .iter()
            .position(|&b| b == 0)
            .ok_or(PersistenceError::BadLayerName { index: i })?;
        let entry = FileLayer {
            name: name_field[..name_len].to_vec(),
            voxel_size: read_u32(&data, base + NAME_FIELD_LEN, "layer directory")?,
            revision: read_u32(&data, base + NAME_FIELD_LEN + 4, "layer directory")?,
            file_offset: read_u32(&data, base + NAME_FIELD_LEN + 8, "layer directory")?,
        };
        if !layers.iter().any(|l| l.name.as_bytes() == entry.name) {
            log::info!(
                "{}: ignoring unregistered chunk layer '{}'",
                path.display(),
                String::from_utf8_lossy(&entry.name)
            );
        }
        file_layers.push(entry);
    }

    let mut out: Vec<Option<Box<[u8]>>> = vec![None; layers.len()];
    for (index, layer) in layers.iter().enumerate() {
        let Some(entry) = file_layers
            .iter()
            .find(|e| e.name == layer.name.as_bytes())
        else {
            continue;
        };
        if entry.voxel_size != layer.voxel_size || entry.revision != layer.revision {
            log::error!(
                "{}: chunk layer '{}' differs from the registered layer \
                 (file {}b rev {}, registered {}b rev {}), skipping it",
                path.display(),
                layer.name,
                entry.voxel_size,
                entry.revision,
                layer.voxel_size,
                layer.revision
            );
            continue;
        }

        let len = voxels_per_chunk * layer.voxel_size as usize;
        let offset = entry.file_offset as usize;
        let payload = data
            .get(offset..offset + len)
            .ok_or(PersistenceError::PayloadOutOfBounds {
                offset: entry.file_offset,
                len,
            })?;

        let mut buf = vec![0u8; len].into_boxed_slice();
        (layer.deserialize)(payload, &mut buf, voxels_per_chunk);
        out[index] = Some(buf);
    }

    Ok(out)
}

/// Encode the present layers into the chunk file at `path`.
///
/// The parent directory is created if missing. The file is written to a
/// sibling temp file and renamed into place, so readers never observe a
/// half-written chunk; there is no fsync contract.
pub fn write_chunk(
    path: &Path,
    layers: &[LayerDesc],
    edge: u32,
    voxels_per_chunk: usize,
    bufs: &[Option<Box<[u8]>>],
) -> Result<(), PersistenceError> {
    debug_assert_eq!(layers.len(), bufs.len());

    let present: Vec<(usize, &[u8])> = bufs
        .iter()
        .enumerate()
        .filter_map(|(i, slot)| slot.as_deref().map(|buf| (i, buf)))
        .collect();

    let dir_len = present.len() * DIR_ENTRY_LEN;
    let payload_len: usize = present
        .iter()
        .map(|(i, _)| voxels_per_chunk * layers[*i].voxel_size as usize)
        .sum();
    let mut data = Vec::with_capacity(HEADER_LEN + dir_len + payload_len);

    data.extend_from_slice(&CHUNK_FILE_VERSION.to_le_bytes());
    data.extend_from_slice(&edge.to_le_bytes());
    data.extend_from_slice(&(present.len() as u32).to_le_bytes());

    let mut file_offset = (HEADER_LEN + dir_len) as u32;
    for (i, _) in &present {
        let layer = &layers[*i];
        let mut name_field = [0u8; NAME_FIELD_LEN];
        name_field[..layer.name.len()].copy_from_slice(layer.name.as_bytes());
        data.extend_from_slice(&name_field);
        data.extend_from_slice(&layer.voxel_size.to_le_bytes());
        data.extend_from_slice(&layer.revision.to_le_bytes());
        data.extend_from_slice(&file_offset.to_le_bytes());
        file_offset += (voxels_per_chunk * layer.voxel_size as usize) as u32;
    }

    for (i, buf) in &present {
        let layer = &layers[*i];
        let len = voxels_per_chunk * layer.voxel_size as usize;
        debug_assert_eq!(buf.len(), len);
        let mut portable = vec![0u8; len];
        (layer.serialize)(buf, &mut portable, voxels_per_chunk);
        data.extend_from_slice(&portable);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &data)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn layers() -> Vec<LayerDesc> {
        vec![
            LayerDesc::new("Material", 1, 1),
            LayerDesc::new("Pressure", 2, 1),
        ]
    }

    const EDGE: u32 = 4;
    const VOXELS: usize = 64;

    #[test]
    fn file_name_embeds_coordinates() {
        let name = chunk_file_name(Path::new("/data"), ChunkPos::new(-1, 2, -3));
        assert_eq!(name, Path::new("/data/-1_2_-3"));
    }

    #[test]
    fn roundtrip_restores_present_layers() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("0_0_0");
        let layers = layers();

        let mut material = vec![0u8; VOXELS].into_boxed_slice();
        material[0] = 42;
        material[VOXELS - 1] = 7;
        let bufs = vec![Some(material.clone()), None];

        write_chunk(&path, &layers, EDGE, VOXELS, &bufs).expect("write");
        let read = read_chunk(&path, &layers, EDGE, VOXELS).expect("read");

        assert_eq!(read[0].as_deref(), Some(&material[..]));
        assert!(read[1].is_none());
    }

    #[test]
    fn header_and_directory_are_byte_exact() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("1_2_3");
        let layers = layers();

        let bufs = vec![
            Some(vec![1u8; VOXELS].into_boxed_slice()),
            Some(vec![2u8; VOXELS * 2].into_boxed_slice()),
        ];
        write_chunk(&path, &layers, EDGE, VOXELS, &bufs).expect("write");

        let data = std::fs::read(&path).expect("raw bytes");
        assert_eq!(&data[0..4], &1u32.to_le_bytes());
        assert_eq!(&data[4..8], &EDGE.to_le_bytes());
        assert_eq!(&data[8..12], &2u32.to_le_bytes());

        // first directory entry: "Material", size 1, revision 1
        assert_eq!(&data[12..20], b"Material");
        assert!(data[20..44].iter().all(|&b| b == 0));
        assert_eq!(&data[44..48], &1u32.to_le_bytes());
        assert_eq!(&data[48..52], &1u32.to_le_bytes());
        let first_offset = (HEADER_LEN + 2 * DIR_ENTRY_LEN) as u32;
        assert_eq!(&data[52..56], &first_offset.to_le_bytes());

        // second entry payload sits right behind the first
        let second_offset = first_offset + VOXELS as u32;
        assert_eq!(&data[96..100], &second_offset.to_le_bytes());
        assert_eq!(data.len(), second_offset as usize + VOXELS * 2);
    }

    #[test]
    fn unregistered_file_layer_is_ignored() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("0_0_0");

        let writer_layers = vec![LayerDesc::new("Legacy", 1, 1)];
        let bufs = vec![Some(vec![9u8; VOXELS].into_boxed_slice())];
        write_chunk(&path, &writer_layers, EDGE, VOXELS, &bufs).expect("write");

        let read = read_chunk(&path, &layers(), EDGE, VOXELS).expect("read");
        assert!(read.iter().all(Option::is_none));
    }

    #[test]
    fn revision_mismatch_skips_layer_only() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("0_0_0");

        let writer_layers = vec![
            LayerDesc::new("Material", 1, 1),
            LayerDesc::new("Pressure", 2, 1),
        ];
        let bufs = vec![
            Some(vec![5u8; VOXELS].into_boxed_slice()),
            Some(vec![6u8; VOXELS * 2].into_boxed_slice()),
        ];
        write_chunk(&path, &writer_layers, EDGE, VOXELS, &bufs).expect("write");

        let mut reader_layers = layers();
        reader_layers[1].revision = 2;
        let read = read_chunk(&path, &reader_layers, EDGE, VOXELS).expect("read");
        assert!(read[0].is_some());
        assert!(read[1].is_none());
    }

    #[test]
    fn truncated_file_is_an_error() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("0_0_0");
        std::fs::write(&path, [0u8; 6]).expect("write stub");

        assert!(matches!(
            read_chunk(&path, &layers(), EDGE, VOXELS),
            Err(PersistenceError::Truncated(_))
        ));
    }

    #[test]
    fn wrong_version_is_an_error() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("0_0_0");
        let mut data = Vec::new();
        data.extend_from_slice(&9u32.to_le_bytes());
        data.extend_from_slice(&EDGE.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        std::fs::write(&path, data).expect("write stub");

        assert!(matches!(
            read_chunk(&path, &layers(), EDGE, VOXELS),
            Err(PersistenceError::VersionMismatch { found: 9 })
        ));
    }

    #[test]
    fn wrong_edge_length_is_an_error() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("0_0_0");
        let layers = layers();
        write_chunk(&path, &layers, EDGE, VOXELS, &[None, None]).expect("write");

        assert!(matches!(
            read_chunk(&path, &layers, 8, 512),
            Err(PersistenceError::EdgeLengthMismatch {
                found: EDGE,
                expected: 8
            })
        ));
    }

    #[test]
    fn payload_outside_file_is_an_error() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("0_0_0");
        let layers = layers();
        let bufs = vec![Some(vec![1u8; VOXELS].into_boxed_slice()), None];
        write_chunk(&path, &layers, EDGE, VOXELS, &bufs).expect("write");

        // chop the payload off
        let data = std::fs::read(&path).expect("read back");
        std::fs::write(&path, &data[..data.len() - 1]).expect("truncate");

        assert!(matches!(
            read_chunk(&path, &layers, EDGE, VOXELS),
            Err(PersistenceError::PayloadOutOfBounds { .. })
        ));
    }

    #[test]
    fn codec_callbacks_run_payload_wide() {
        fn invert(src: &[u8], dst: &mut [u8], _count: usize) {
            for (d, s) in dst.iter_mut().zip(src) {
                *d = !s;
            }
        }

        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("0_0_0");
        let layers = vec![LayerDesc::new("Material", 1, 1).with_codec(invert, invert)];

        let original = vec![0xAAu8; VOXELS].into_boxed_slice();
        write_chunk(&path, &layers, EDGE, VOXELS, &[Some(original.clone())]).expect("write");

        // on disk: inverted
        let data = std::fs::read(&path).expect("raw bytes");
        assert!(data[HEADER_LEN + DIR_ENTRY_LEN..].iter().all(|&b| b == 0x55));

        // after load: inverted back
        let read = read_chunk(&path, &layers, EDGE, VOXELS).expect("read");
        assert_eq!(read[0].as_deref(), Some(&original[..]));
    }
}
