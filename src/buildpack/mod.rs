//! Buildpacks and extensions: descriptors, locators, layers and packages

pub mod blob;
pub mod descriptor;
pub mod downloader;
pub mod locator;
pub mod package;
pub mod registry;
pub mod resolve;

pub use blob::{BuildModule, ModuleSource};
pub use descriptor::{Descriptor, Group, ModuleInfo, ModuleKind, ModuleRef, Order};
pub use downloader::Downloader;
pub use locator::Locator;
pub use package::{ModuleLayers, PackageMetadata};
pub use registry::RegistryIndex;
pub use resolve::{ModuleResolver, Resolved, ResolvedSet};
