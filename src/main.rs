//! Interactive inspector for the chapter extraction library.
//!
//! `mp4chap <file>` prints the embedded chapter list as JSON (`null` when
//! the file carries none), the same shape the ingestion pipeline consumes.
//! `mp4chap --atoms <file>` dumps the box tree instead, which is handy when
//! a file that should have chapters comes back empty.

use std::env;
use std::fs::File;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use memmap2::Mmap;
use tracing_subscriber::EnvFilter;

use mp4chap::atom::scan;
use mp4chap::{extract_chapters, FourCC};

const CONTAINERS: &[FourCC] = &[
    FourCC::of(b"moov"),
    FourCC::of(b"trak"),
    FourCC::of(b"tref"),
    FourCC::of(b"edts"),
    FourCC::of(b"mdia"),
    FourCC::of(b"minf"),
    FourCC::of(b"dinf"),
    FourCC::of(b"stbl"),
    FourCC::of(b"udta"),
];

fn usage() -> ExitCode {
    eprintln!("usage: mp4chap [--atoms] <file>");
    ExitCode::from(2)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut atoms = false;
    let mut path = None;
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "--atoms" => atoms = true,
            _ if path.is_none() => path = Some(PathBuf::from(arg)),
            _ => return usage(),
        }
    }
    let Some(path) = path else {
        return usage();
    };

    let result = if atoms {
        dump_atoms(&path)
    } else {
        print_chapters(&path)
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("mp4chap: {error:#}");
            ExitCode::FAILURE
        }
    }
}

fn print_chapters(path: &Path) -> anyhow::Result<()> {
    let chapters =
        extract_chapters(path).with_context(|| format!("reading {}", path.display()))?;
    println!("{}", serde_json::to_string_pretty(&chapters)?);
    Ok(())
}

fn dump_atoms(path: &Path) -> anyhow::Result<()> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let map = unsafe { Mmap::map(&file) }
        .with_context(|| format!("mapping {}", path.display()))?;
    dump_range(&map, 0..map.len(), 0);
    Ok(())
}

fn dump_range(buf: &[u8], range: Range<usize>, depth: usize) {
    for atom in scan(buf, range) {
        println!(
            "{:indent$}{} offset={} size={}",
            "",
            atom.header.kind,
            atom.offset,
            atom.header.size,
            indent = depth * 2
        );
        if CONTAINERS.contains(&atom.header.kind) {
            dump_range(buf, atom.payload(), depth + 1);
        }
    }
}
