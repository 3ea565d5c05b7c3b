// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Example: save a few tensors to disk, inspect the header, load them back.
//!
//! ```bash
//! cargo run -p st-format --example roundtrip [-- <path>]
//! ```

use st_format::{load_file, read_header, save_file, MmapReader};
use std::collections::HashMap;
use tensor_core::{DType, Shape, Tensor};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing.
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .init();

    let target = std::env::args()
        .nth(1)
        .unwrap_or_else(|| std::env::temp_dir().join("roundtrip").display().to_string());

    // A small two-layer MLP; the second weight is stored transposed.
    let w1 = Tensor::from_f32(Shape::matrix(4, 3), &(0..12).map(|i| i as f32).collect::<Vec<_>>())?;
    let b1 = Tensor::zeros(Shape::vector(4), DType::F32);
    let w2 = Tensor::from_f32(Shape::matrix(3, 2), &[1.0, -1.0, 0.5, -0.5, 0.25, -0.25])?.permute(&[1, 0])?;
    let mask = Tensor::from_bytes(Shape::vector(4), DType::Bool, vec![1, 0, 1, 1])?;

    let metadata = HashMap::from([
        ("format".to_string(), "pt".to_string()),
        ("model".to_string(), "mlp-2".to_string()),
    ]);
    let path = save_file(
        &target,
        [("fc1.weight", w1), ("fc1.bias", b1), ("fc2.weight", w2), ("mask", mask)],
        Some(&metadata),
    )?;
    println!("wrote {}", path.display());

    let (header, length) = read_header(&MmapReader::open(&path))?;
    println!("header: {length} bytes, {}", header.summary());
    for (name, entry) in &header.entries {
        println!(
            "  {name:<12} {:<5} {:<8} [{}, {})",
            entry.dtype.as_str(),
            entry.shape.to_string(),
            entry.start(),
            entry.end()
        );
    }

    let loaded = load_file(&path)?;
    let fc2 = loaded.get("fc2.weight").ok_or("fc2.weight missing")?.realize()?;
    println!("fc2.weight {} = {:?}", fc2.shape(), fc2.to_f32_vec()?);
    Ok(())
}
