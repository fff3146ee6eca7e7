//! Tile output: the encoder and sink seams, and the built-in sinks.
//!
//! The vector-tile encoding step (geometries to protobuf bytes) and the
//! MBTiles/PMTiles archive writers are external collaborators; the
//! pipeline hands them `(zoom, x, y) -> bytes` through [`TileSink`].
//! Built in are the directory layout, a newline-delimited GeoJSON debug
//! sink and an in-memory sink for tests. Selection is by output-path
//! suffix.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tileforge_common::{Error, Result};
use tileforge_geometry::TileCoordinates;

/// Receives encoded tiles. `write_tile` is called from the single
/// writer loop, in unspecified tile order.
pub trait TileSink: Send {
    fn write_tile(&mut self, zoom: u8, coords: TileCoordinates, data: &[u8]) -> Result<()>;

    /// Flushes and closes the output.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Picks a sink from the output path suffix: a `.geojson` file gets the
/// debug sink, anything without a recognized archive suffix is treated
/// as a tile directory. MBTiles/PMTiles need their external writers.
pub fn sink_for_path(path: &Path) -> Result<Box<dyn TileSink>> {
    let name = path.to_string_lossy();
    if name.ends_with(".mbtiles") || name.ends_with(".sqlite") || name.ends_with(".pmtiles") {
        return Err(Error::invalid_option(
            "output",
            format!("{name}: archive outputs are provided by an external writer"),
        ));
    }
    if name.ends_with(".geojson") {
        return Ok(Box::new(GeoJsonlSink::create(path)?));
    }
    Ok(Box::new(DirectorySink::create(path)?))
}

/// Writes tiles as `<root>/<z>/<x>/<y>.pbf`.
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn create(root: &Path) -> Result<DirectorySink> {
        fs::create_dir_all(root).map_err(|e| Error::io(root.display().to_string(), e))?;
        Ok(DirectorySink {
            root: root.to_path_buf(),
        })
    }
}

impl TileSink for DirectorySink {
    fn write_tile(&mut self, zoom: u8, coords: TileCoordinates, data: &[u8]) -> Result<()> {
        let dir = self.root.join(zoom.to_string()).join(coords.x.to_string());
        fs::create_dir_all(&dir).map_err(|e| Error::io(dir.display().to_string(), e))?;
        let path = dir.join(format!("{}.pbf", coords.y));
        fs::write(&path, data).map_err(|e| Error::io(path.display().to_string(), e))
    }
}

/// Debug sink: one line of JSON per tile, `{"z":..,"x":..,"y":..}` plus
/// the encoder's payload verbatim (expected to be a JSON value).
pub struct GeoJsonlSink {
    out: std::io::BufWriter<fs::File>,
}

impl GeoJsonlSink {
    pub fn create(path: &Path) -> Result<GeoJsonlSink> {
        let file = fs::File::create(path).map_err(|e| Error::io(path.display().to_string(), e))?;
        Ok(GeoJsonlSink {
            out: std::io::BufWriter::new(file),
        })
    }
}

impl GeoJsonlSink {
    fn write_line(&mut self, zoom: u8, coords: TileCoordinates, data: &[u8]) -> std::io::Result<()> {
        write!(
            self.out,
            "{{\"z\":{},\"x\":{},\"y\":{},\"data\":",
            zoom, coords.x, coords.y
        )?;
        self.out.write_all(data)?;
        self.out.write_all(b"}\n")
    }
}

impl TileSink for GeoJsonlSink {
    fn write_tile(&mut self, zoom: u8, coords: TileCoordinates, data: &[u8]) -> Result<()> {
        self.write_line(zoom, coords, data)
            .map_err(|e| Error::io("geojson sink", e))
    }

    fn finish(&mut self) -> Result<()> {
        self.out.flush().map_err(|e| Error::io("geojson sink", e))
    }
}

/// In-memory sink; tiles come back sorted for byte-stable comparisons.
#[derive(Default)]
pub struct MemorySink {
    tiles: Vec<(u8, TileCoordinates, Vec<u8>)>,
}

impl MemorySink {
    pub fn new() -> MemorySink {
        MemorySink::default()
    }

    pub fn into_tiles(mut self) -> Vec<(u8, TileCoordinates, Vec<u8>)> {
        self.tiles.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        self.tiles
    }
}

impl TileSink for MemorySink {
    fn write_tile(&mut self, zoom: u8, coords: TileCoordinates, data: &[u8]) -> Result<()> {
        self.tiles.push((zoom, coords, data.to_vec()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_selection() {
        assert!(sink_for_path(Path::new("/nonexistent-dir-for-test/x.mbtiles")).is_err());
        assert!(sink_for_path(Path::new("/nonexistent-dir-for-test/x.pmtiles")).is_err());
    }

    #[test]
    fn test_directory_sink_layout() {
        let root = std::env::temp_dir().join("tileforge-sink-test");
        let _ = fs::remove_dir_all(&root);
        let mut sink = DirectorySink::create(&root).unwrap();
        sink.write_tile(3, TileCoordinates::new(4, 5), b"abc").unwrap();
        sink.finish().unwrap();
        let written = fs::read(root.join("3/4/5.pbf")).unwrap();
        assert_eq!(written, b"abc");
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_memory_sink_sorts() {
        let mut sink = MemorySink::new();
        sink.write_tile(2, TileCoordinates::new(3, 1), b"b").unwrap();
        sink.write_tile(1, TileCoordinates::new(0, 0), b"a").unwrap();
        let tiles = sink.into_tiles();
        assert_eq!(tiles[0].0, 1);
        assert_eq!(tiles[1].0, 2);
    }
}
