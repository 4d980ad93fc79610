#!/usr/bin/env scriptbin
// scriptbin-begin
// script_src: src/main.rs
// build_cmd: cargo build --release && strip ./target/release/script
// target_bin: ./target/release/script
// files:
//   - path: Cargo.toml
//     content: |
//       [package]
//       name = "script"
//       version = "0.1.0"
//       edition = "2021"
// docker_build:
//   dockerfile: |
//     FROM rust:1-alpine
//     RUN apk add --no-cache musl-dev
//   src_mount_dir: /src
// scriptbin-end

fn main() {
    println!("Hello from a container-built binary");
}
