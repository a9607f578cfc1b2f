/// Fragment-scoped query-variable allocator. Every variable a fragment
/// introduces is minted here with a monotone counter, so no name is ever
/// reused for two different sub-entities within one fragment. This is the
/// single enforcement point for the per-fragment uniqueness invariant.
#[derive(Debug, Default)]
pub struct VarAllocator {
    next: u64,
}

impl VarAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint `$<stem>_<n>`. Stems are lowercased with non-alphanumerics
    /// mapped to `_` so attribute and relation names are legal stems.
    pub fn fresh(&mut self, stem: &str) -> String {
        let stem: String = stem
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '_'
                }
            })
            .collect();
        let n = self.next;
        self.next += 1;
        format!("${stem}_{n}")
    }
}
