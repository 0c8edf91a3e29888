/// Parses a resourceVersion into its numeric ordering key.
///
/// The server treats resourceVersions as opaque strings, but the dashboard
/// backend only ever hands out etcd revisions, so they compare as integers.
pub fn parse_resource_version(value: &str) -> Option<u64> {
    value.trim().parse().ok()
}
