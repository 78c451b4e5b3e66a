//! CLI tool to run a saved screenshot through the full recognition pipeline.
//! Usage: cargo run --bin scan_frame -- <screenshot.png> [data_dir] [config.json]

use megabonk_scan::{init_tracing, ScanConfig, ScanSession};
use mb_data::Catalog;
use std::path::PathBuf;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <screenshot.png> [data_dir] [config.json]", args[0]);
        std::process::exit(1);
    }

    let input_path = PathBuf::from(&args[1]);
    let data_dir = PathBuf::from(args.get(2).map(String::as_str).unwrap_or("./data"));
    let config = match args.get(3) {
        Some(path) => ScanConfig::load(&PathBuf::from(path))?,
        None => ScanConfig::default(),
    };

    let session = Arc::new(ScanSession::open(config)?);

    println!("Loading catalog: {}", data_dir.display());
    let catalog = Catalog::load(&data_dir)?;
    let report = session.load_templates(&data_dir, &catalog).await;
    println!(
        "Templates: {} loaded, {} failed ({} ms)",
        report.loaded.len(),
        report.failed.len(),
        report.elapsed_ms
    );
    for (id, reason) in &report.failed {
        println!("  {}: {}", id, reason);
    }

    println!("\nScanning: {}", input_path.display());
    let bytes = tokio::fs::read(&input_path).await?;
    match session.scan_bytes(bytes).await {
        Ok(scan) => {
            if let Some(cal) = &scan.calibration {
                println!(
                    "Grid: {}x{} icons at ({}, {}), {} per row, {} rows (confidence {:.2}{})",
                    cal.icon_width,
                    cal.icon_height,
                    cal.x_offset,
                    cal.y_offset,
                    cal.icons_per_row,
                    cal.rows,
                    scan.calibration_confidence,
                    if scan.from_preset { ", preset" } else { "" }
                );
            }
            println!(
                "Cells: {} scanned, {} empty, {} unmatched",
                scan.cells_scanned, scan.empty_cells, scan.unmatched_cells
            );
            println!("\n=== Detections ===");
            for det in &scan.detections {
                let name = catalog
                    .get(&det.entity_id)
                    .map(|e| e.name.as_str())
                    .unwrap_or(det.entity_id.as_str());
                match &det.position {
                    Some(p) => println!(
                        "  {:<24} {:.3}  at ({}, {}) {}x{}",
                        name, det.confidence, p.x, p.y, p.width, p.height
                    ),
                    None => println!("  {:<24} {:.3}", name, det.confidence),
                }
            }
            if !scan.reasons.is_empty() {
                let tags: Vec<&str> = scan.reasons.iter().map(|r| r.tag()).collect();
                println!("Flags: {}", tags.join(", "));
            }
        }
        Err(e) => {
            let tags: Vec<&str> = e.reasons().iter().map(|r| r.tag()).collect();
            println!("Scan failed: {} [{}]", e, tags.join(", "));
        }
    }

    println!("\n=== Session ===");
    println!("{}", session.describe());
    session.persist()?;
    Ok(())
}
