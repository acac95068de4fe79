//! apfsck-tool — check APFS container images for b-tree corruption
//!
//! # Usage
//!
//! ```text
//! apfsck-tool check <image>          Walk every b-tree and verify integrity
//! apfsck-tool omap <image> <oid>     Resolve an oid through the container omap
//! ```
//!
//! Exits 0 on a clean image, 1 on the first structural fault.

mod style;

use std::env;
use std::fs::File;
use std::io::BufReader;
use std::process;

use style::{format_size, BOLD, DIM, GREEN, RED, RESET};

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "check" => check(&args[2..]),
        "omap" => omap(&args[2..]),
        "-h" | "--help" | "help" => {
            print_usage();
            Ok(())
        }
        _ => {
            eprintln!("{RED}Unknown command: {}{RESET}", args[1]);
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("{RED}error:{RESET} {e}");
        process::exit(1);
    }
}

fn print_usage() {
    eprintln!(
        r#"
{BOLD}apfsck-tool{RESET} — APFS b-tree consistency checker

{BOLD}COMMANDS:{RESET}
    {GREEN}check{RESET}  <image>          Walk every b-tree and verify integrity
    {GREEN}omap{RESET}   <image> <oid>    Resolve an oid through the container omap
"#
    );
}

fn open_image(path: &str) -> Result<BufReader<File>, Box<dyn std::error::Error>> {
    Ok(BufReader::new(File::open(path)?))
}

fn check(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    if args.is_empty() {
        eprintln!("Usage: apfsck-tool check <image>");
        process::exit(1);
    }

    let reader = open_image(&args[0])?;
    let summary = apfsck::check_container(reader)?;

    println!("{BOLD}{}{RESET}: clean", args[0]);
    println!("  volume       {}", summary.volume_name);
    println!(
        "  geometry     {} blocks of {} {DIM}({}){RESET}",
        summary.block_count,
        summary.block_size,
        format_size(summary.block_count * summary.block_size as u64),
    );
    println!(
        "  objects      {} files, {} directories, {} symlinks",
        summary.num_files, summary.num_directories, summary.num_symlinks,
    );
    Ok(())
}

fn omap(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    if args.len() < 2 {
        eprintln!("Usage: apfsck-tool omap <image> <oid>");
        process::exit(1);
    }

    let oid = parse_oid(&args[1])?;

    let mut reader = open_image(&args[0])?;
    let nxsb = apfsck::superblock::read_nxsb(&mut reader)?;
    let nxsb = apfsck::superblock::find_latest_nxsb(&mut reader, &nxsb)?;

    let mut ctr = apfsck::Container::new(reader, nxsb.block_size);
    let omap_root = apfsck::check::parse_omap_btree(&mut ctr, nxsb.omap_oid)?;
    let block = apfsck::omap_lookup_block(&mut ctr, &omap_root, oid)?;

    println!("oid {BOLD}0x{oid:x}{RESET} -> block {BOLD}0x{block:x}{RESET}");
    Ok(())
}

fn parse_oid(arg: &str) -> Result<u64, Box<dyn std::error::Error>> {
    let oid = match arg.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16)?,
        None => arg.parse()?,
    };
    Ok(oid)
}
