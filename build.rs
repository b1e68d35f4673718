//! Build script for nftset-api
//!
//! Embeds build-time information (git commit, dirty status, build timestamp)
//! for `--version` output.

fn main() {
    shadow_rs::ShadowBuilder::builder()
        .build()
        .expect("Failed to generate build info");
}
