//! Option resolution: turns the raw CLI flags into a validated run
//! configuration, applying the store/speed/memory flag interplay.

use std::path::{Path, PathBuf};

use tileforge_common::{Error, Result};

use crate::Cli;

#[derive(Debug, Clone)]
pub struct Options {
    pub input: PathBuf,
    pub output: PathBuf,
    pub bbox: Option<[f64; 4]>,
    pub merge: bool,
    pub config: PathBuf,
    pub process: PathBuf,
    pub skip_integrity: bool,
    pub log_tile_timings: bool,
    pub store_path: Option<PathBuf>,
    pub compact: bool,
    pub compress_nodes: bool,
    pub compress_ways: bool,
    pub materialize_geometries: bool,
    pub shard_stores: bool,
    pub threads: usize,
}

pub fn resolve(cli: &Cli) -> Result<Options> {
    let mut materialize_geometries = true;
    let mut shard_stores = cli.shard_stores;

    // With an external store file, sharded multi-pass reading is the
    // default unless the user asked for speed; without one, geometries
    // are materialized in memory.
    if let Some(store) = &cli.store {
        if store.is_empty() {
            return Err(Error::invalid_option("store", "empty path"));
        }
        if !cli.fast {
            shard_stores = true;
        }
        materialize_geometries = false;
    }
    if cli.lazy_geometries {
        materialize_geometries = false;
    }
    if cli.materialize_geometries {
        materialize_geometries = true;
    }

    let bbox = cli.bbox.as_deref().map(parse_bbox).transpose()?;

    if !Path::new(&cli.config).exists() {
        return Err(Error::invalid_option(
            "config",
            format!("couldn't open .json config: {}", cli.config),
        ));
    }
    if !Path::new(&cli.process).exists() {
        return Err(Error::invalid_option(
            "process",
            format!("couldn't open script: {}", cli.process),
        ));
    }

    let threads = if cli.threads == 0 {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    } else {
        cli.threads as usize
    };

    Ok(Options {
        input: PathBuf::from(&cli.input),
        output: PathBuf::from(&cli.output),
        bbox,
        merge: cli.merge,
        config: PathBuf::from(&cli.config),
        process: PathBuf::from(&cli.process),
        skip_integrity: cli.skip_integrity,
        log_tile_timings: cli.log_tile_timings,
        store_path: cli.store.as_ref().map(PathBuf::from),
        compact: cli.compact,
        compress_nodes: !cli.no_compress_nodes,
        compress_ways: !cli.no_compress_ways,
        materialize_geometries,
        shard_stores,
        threads,
    })
}

fn parse_bbox(s: &str) -> Result<[f64; 4]> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 4 {
        return Err(Error::invalid_option(
            "bbox",
            "expected minlon,minlat,maxlon,maxlat",
        ));
    }
    let mut out = [0.0; 4];
    for (slot, part) in out.iter_mut().zip(&parts) {
        *slot = part
            .trim()
            .parse()
            .map_err(|_| Error::invalid_option("bbox", format!("bad coordinate '{part}'")))?;
    }
    if out[0] >= out[2] || out[1] >= out[3] {
        return Err(Error::invalid_option("bbox", "empty bounding box"));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::parse_bbox;

    #[test]
    fn test_parse_bbox() {
        assert_eq!(
            parse_bbox("-0.5,51.2,0.3,51.7").unwrap(),
            [-0.5, 51.2, 0.3, 51.7]
        );
        assert!(parse_bbox("1,2,3").is_err());
        assert!(parse_bbox("a,b,c,d").is_err());
        assert!(parse_bbox("0.3,51.2,-0.5,51.7").is_err());
    }
}
