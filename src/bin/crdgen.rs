// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prints the cfgate CRD manifests as a multi-document YAML stream.
//!
//! ```bash
//! cargo run --bin crdgen > deploy/crds.yaml
//! ```

use kube::CustomResourceExt;

use cfgate::crd::{CloudflareAccessPolicy, CloudflareDNS, CloudflareTunnel};

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&CloudflareTunnel::crd())?);
    println!("---");
    print!("{}", serde_yaml::to_string(&CloudflareDNS::crd())?);
    println!("---");
    print!("{}", serde_yaml::to_string(&CloudflareAccessPolicy::crd())?);
    Ok(())
}
