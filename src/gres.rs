//! Parsing of GPU quantities out of Slurm GRES and TRES strings.
//!
//! Accepted shapes:
//! - TRES: `cpu=4,mem=1024M,gres/gpu=2`, `billing=8,gres/gpu:a100=4,node=1`
//! - legacy GRES: `gpu:2`, `gpu:tesla:4`, `gpu:a100:8(IDX:0-7)`
//! - several legacy entries: `gpu:2,gpu:tesla:1`, `gpu:2,mem:10G`
//!
//! Malformed tokens never fail a scrape; they count as zero.

use tracing::debug;

const NULL_VALUES: [&str; 3] = ["", "N/A", "(null)"];
const TRES_GPU_KEY: &str = "gres/gpu";

/// Returns the number of GPUs described by a GRES or TRES string.
pub fn parse_gres_gpu_count(gres: &str) -> f64 {
    if NULL_VALUES.contains(&gres) {
        return 0.0;
    }

    if gres.contains('=') {
        return parse_tres(gres);
    }

    if gres.contains(',') {
        return gres
            .split(',')
            .map(|part| parse_gres_gpu_count(part.trim()))
            .sum();
    }

    parse_gres_token(gres)
}

/// First entry of a TRES list whose key starts with `gres/gpu`, zero when
/// absent.
///
/// The match is a plain prefix, so `gres/gpumem` and `gres/gpuutil` entries
/// count when they come first.
fn parse_tres(tres: &str) -> f64 {
    tres.split(',')
        .filter_map(|part| part.trim().split_once('='))
        .filter(|(key, _)| key.starts_with(TRES_GPU_KEY))
        .find_map(|(_, value)| parse_quantity(value))
        .unwrap_or(0.0)
}

/// A single legacy token such as `gpu:tesla:4(S:0)`; the count is the last
/// colon-separated field.
fn parse_gres_token(token: &str) -> f64 {
    let token = match token.find('(') {
        Some(idx) => &token[..idx],
        None => token,
    };

    if !token.to_lowercase().contains("gpu") {
        return 0.0;
    }

    let parts: Vec<&str> = token.split(':').collect();
    if parts.len() < 2 {
        return 0.0;
    }

    let count = parts[parts.len() - 1];
    match parse_quantity(count) {
        Some(value) => value,
        None => {
            debug!(gres = token, count, "Failed to parse GPU count");
            0.0
        }
    }
}

fn parse_quantity(value: &str) -> Option<f64> {
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
}
