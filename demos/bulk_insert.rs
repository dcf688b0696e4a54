//! # Bulk Insert Walkthrough
//!
//! Formats a small memory-mapped volume, loads it with keys, and prints the
//! resulting tree in each display mode.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --example bulk_insert --release
//! ```

use std::io::stdout;

use blocktree::{BTreeIndex, DisplayMode, MmapCache};

fn main() -> eyre::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("demo.btx");

    let mut cache = MmapCache::create(&path, 512, 256)?;
    let mut index = BTreeIndex::new(8, 8, &mut cache, true)?;
    index.attach(0, true)?;

    for i in 0..100u32 {
        let key = format!("key{:05}", i);
        let value = format!("{:08}", i * 10);
        index.insert(key.as_bytes(), value.as_bytes())?;
    }

    println!("loaded {} keys into {}", index.num_keys()?, path.display());
    println!("\n--- depth ---");
    index.display(&mut stdout(), DisplayMode::Depth)?;
    println!("\n--- dot ---");
    index.display(&mut stdout(), DisplayMode::DepthDot)?;
    println!("\n--- sorted ---");
    index.display(&mut stdout(), DisplayMode::SortedKeyval)?;

    index.sanity_check()?;
    index.detach()?;
    cache.sync()?;
    println!("\nsanity check passed");
    Ok(())
}
