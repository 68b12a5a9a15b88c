pub mod gocover;

/// First few KB of `content`, lossily decoded, for cheap format sniffing.
pub(crate) fn sniff_head(content: &[u8]) -> std::borrow::Cow<'_, str> {
    let head_len = content.len().min(4096);
    String::from_utf8_lossy(&content[..head_len])
}
