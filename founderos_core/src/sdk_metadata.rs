/// Metadata about the SDK embedding the core pipeline, stamped into every event's context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdkMetadata {
    /// SDK name. Usually, the host platform name.
    pub name: &'static str,
    /// Version of SDK.
    pub version: &'static str,
}

impl Default for SdkMetadata {
    fn default() -> SdkMetadata {
        SdkMetadata {
            name: "founderos-core",
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}
