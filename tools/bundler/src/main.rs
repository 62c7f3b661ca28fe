//! INIT.BND packer.
//!
//! Builds the flat bundle the bootloader hands to the kernel: a header,
//! an entry table, then the entry blobs, each with a CRC-32 the kernel
//! verifies before spawning. Task images come straight from files; the
//! entry name defaults to the file stem.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use quantum_abi::bundle::{Entry, Header, NAME_BYTES, VERSION, entry_type, make_name};

#[derive(Parser)]
#[command(name = "quantum-bundler", about = "Packs INIT.BND images")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Pack task images into a bundle.
    Pack {
        /// Output bundle path.
        #[arg(short, long, default_value = "INIT.BND")]
        output: PathBuf,
        /// Task image files; `name=path` overrides the entry name.
        #[arg(required = true)]
        tasks: Vec<String>,
        /// Additional data blobs (`name=path`).
        #[arg(short, long)]
        data: Vec<String>,
    },
    /// List the contents of an existing bundle.
    List {
        /// Bundle to inspect.
        bundle: PathBuf,
    },
}

fn main() -> Result<()> {
    match Cli::parse().command {
        Command::Pack {
            output,
            tasks,
            data,
        } => pack(&output, &tasks, &data),
        Command::List { bundle } => list(&bundle),
    }
}

struct PendingEntry {
    name: [u8; NAME_BYTES],
    entry_type: u8,
    bytes: Vec<u8>,
}

fn parse_spec(spec: &str, entry_type: u8) -> Result<PendingEntry> {
    let (name, path) = match spec.split_once('=') {
        Some((name, path)) => (name.to_string(), PathBuf::from(path)),
        None => {
            let path = PathBuf::from(spec);
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("image path has no usable file name")?
                .to_string();
            (stem, path)
        }
    };
    if name.is_empty() || name.len() >= NAME_BYTES {
        bail!("entry name '{name}' must be 1..{} bytes", NAME_BYTES - 1);
    }
    let bytes =
        fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
    if bytes.is_empty() {
        bail!("{} is empty", path.display());
    }
    Ok(PendingEntry {
        name: make_name(&name),
        entry_type,
        bytes,
    })
}

fn pack(output: &Path, tasks: &[String], data: &[String]) -> Result<()> {
    let mut entries = Vec::new();
    for spec in tasks {
        entries.push(parse_spec(spec, entry_type::TASK)?);
    }
    for spec in data {
        entries.push(parse_spec(spec, entry_type::DATA)?);
    }
    if entries.len() > u16::MAX as usize {
        bail!("too many entries");
    }

    let bundle = build(&entries);
    fs::write(output, &bundle).with_context(|| format!("writing {}", output.display()))?;
    println!(
        "{}: {} entries, {} bytes",
        output.display(),
        entries.len(),
        bundle.len()
    );
    Ok(())
}

/// Lays out header, table, then page-aligned blobs.
fn build(entries: &[PendingEntry]) -> Vec<u8> {
    let table_offset = Header::DISK_BYTES;
    let mut data_offset = table_offset + entries.len() * Entry::DISK_BYTES;

    let mut table = Vec::with_capacity(entries.len());
    for entry in entries {
        data_offset = data_offset.next_multiple_of(16);
        table.push(Entry {
            name: entry.name,
            entry_type: entry.entry_type,
            flags: 0,
            offset: data_offset as u32,
            size: entry.bytes.len() as u32,
            checksum: crc32fast::hash(&entry.bytes),
        });
        data_offset += entry.bytes.len();
    }

    let mut out = Vec::with_capacity(data_offset);
    out.extend_from_slice(
        &Header {
            version: VERSION,
            entry_count: entries.len() as u16,
            table_offset: table_offset as u32,
        }
        .to_bytes(),
    );
    for entry in &table {
        out.extend_from_slice(&entry.to_bytes());
    }
    for (entry, meta) in entries.iter().zip(&table) {
        while out.len() < meta.offset as usize {
            out.push(0);
        }
        out.extend_from_slice(&entry.bytes);
    }
    out
}

fn list(path: &Path) -> Result<()> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let header = Header::parse(&bytes).context("not a valid INIT.BND image")?;
    println!(
        "{}: version {}, {} entries",
        path.display(),
        header.version,
        header.entry_count
    );
    for index in 0..header.entry_count as usize {
        let offset = header.table_offset as usize + index * Entry::DISK_BYTES;
        let entry = Entry::parse(&bytes[offset..]).context("truncated entry table")?;
        let blob = bytes
            .get(entry.offset as usize..(entry.offset + entry.size) as usize)
            .context("entry points outside the bundle")?;
        let crc_ok = crc32fast::hash(blob) == entry.checksum;
        println!(
            "  {:<32} {} {:>8} bytes at {:#010x} crc {}",
            entry.name_str(),
            if entry.entry_type == entry_type::TASK {
                "task"
            } else {
                "data"
            },
            entry.size,
            entry.offset,
            if crc_ok { "ok" } else { "BAD" },
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(name: &str, bytes: &[u8]) -> PendingEntry {
        PendingEntry {
            name: make_name(name),
            entry_type: entry_type::TASK,
            bytes: bytes.to_vec(),
        }
    }

    #[test]
    fn built_bundle_parses_back() {
        let bundle = build(&[
            pending("coordinator", &[0x90; 512]),
            pending("testsuite", &[0xCC; 100]),
        ]);
        let header = Header::parse(&bundle).unwrap();
        assert_eq!(header.entry_count, 2);

        let first =
            Entry::parse(&bundle[header.table_offset as usize..]).unwrap();
        assert!(first.name_matches("coordinator"));
        assert_eq!(first.size, 512);

        let blob = &bundle[first.offset as usize..(first.offset + first.size) as usize];
        assert_eq!(crc32fast::hash(blob), first.checksum);
    }

    #[test]
    fn blobs_are_aligned() {
        let bundle = build(&[pending("a", &[1]), pending("b", &[2; 33])]);
        let header = Header::parse(&bundle).unwrap();
        for index in 0..header.entry_count as usize {
            let offset = header.table_offset as usize + index * Entry::DISK_BYTES;
            let entry = Entry::parse(&bundle[offset..]).unwrap();
            assert_eq!(entry.offset % 16, 0);
        }
    }

    #[test]
    fn name_spec_parsing() {
        assert!(parse_spec("missing-file.bin", entry_type::TASK).is_err());
        assert!(parse_spec(&format!("{}=x", "n".repeat(64)), entry_type::TASK).is_err());
    }
}
