//! Prints the platform.adhar.io CRD manifests to stdout.
//!
//! Usage: `cargo run --bin crdgen > manifests/crds.yaml`

use anyhow::Result;
use kube::CustomResourceExt;

use platform_controller::crd::{CustomPackage, GitRepository, Platform};

fn main() -> Result<()> {
    print!("{}", serde_yaml::to_string(&Platform::crd())?);
    println!("---");
    print!("{}", serde_yaml::to_string(&GitRepository::crd())?);
    println!("---");
    print!("{}", serde_yaml::to_string(&CustomPackage::crd())?);
    Ok(())
}
