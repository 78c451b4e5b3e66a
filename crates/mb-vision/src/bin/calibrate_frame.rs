//! CLI tool to run grid calibration on a saved screenshot.
//! Usage: cargo run -p mb-vision --features cli --bin calibrate_frame -- <screenshot.png> [output_dir]

use mb_capture::crop_roi;
use mb_vision::{calibrate, CalibrationConfig};
use std::path::PathBuf;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mb_vision=debug,mb_capture=debug".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <screenshot.png> [output_dir]", args[0]);
        std::process::exit(1);
    }

    let input_path = PathBuf::from(&args[1]);
    let output_dir = args.get(2).map(PathBuf::from);
    if let Some(dir) = &output_dir {
        let _ = std::fs::create_dir_all(dir);
    }

    println!("Loading image: {}", input_path.display());
    let img = match image::open(&input_path) {
        Ok(img) => img.to_rgba8(),
        Err(e) => {
            eprintln!("Failed to open image: {}", e);
            std::process::exit(1);
        }
    };
    let (w, h) = img.dimensions();
    println!("Image size: {}x{}", w, h);

    let outcome = calibrate(&img, &CalibrationConfig::default(), None);

    println!("\n=== Band ===");
    println!(
        "y={} height={} confidence={:.2}",
        outcome.band.y, outcome.band.height, outcome.band.confidence
    );

    println!("\n=== Borders ===");
    println!("{} edges (confidence {:.2})", outcome.borders.edges.len(), outcome.borders.confidence);
    for edge in &outcome.borders.edges {
        println!(
            "  x={:<5} w={} rows {}..{} {:?} strength {:.2}",
            edge.x, edge.width, edge.top, edge.bottom, edge.rarity, edge.strength
        );
    }

    if let Some(m) = &outcome.metrics {
        println!("\n=== Icon metrics ===");
        println!(
            "icon {}x{} spacing {} top {}{} confidence {:.2}",
            m.icon_width,
            m.icon_height,
            m.spacing,
            m.top,
            if m.is_default { " (default)" } else { "" },
            m.confidence
        );
    }

    let cal = &outcome.grid.calibration;
    println!("\n=== Grid ===");
    println!(
        "offset ({}, {}) {} per row x {} rows = {} slots",
        cal.x_offset, cal.y_offset, cal.icons_per_row, cal.rows, cal.total_slots
    );
    println!(
        "{} of {} cells accepted, {} rejected",
        outcome.validation.cells.len(),
        outcome.grid.cells.len(),
        outcome.validation.rejected
    );
    for cell in &outcome.validation.cells {
        let label = cell.label.as_deref().unwrap_or("?");
        println!("  {}: x={} y={} {}x{}", label, cell.x, cell.y, cell.width, cell.height);
        if let Some(dir) = &output_dir {
            if let Some(crop) = crop_roi(&img, cell) {
                let _ = crop.save(dir.join(format!("cell_{}.png", label)));
            }
        }
    }

    println!("\n=== Result ===");
    println!(
        "success={} confidence={:.2}",
        outcome.success, outcome.validation.confidence
    );
    if !outcome.reasons().is_empty() {
        let tags: Vec<&str> = outcome.reasons().iter().map(|r| r.tag()).collect();
        println!("reasons: {}", tags.join(", "));
    }
}
