use crate::types::retrieval::{Block, ContextPack};

/// Separator between blocks of a merged pack.
pub const DEFAULT_JOIN: &str = "\n\n";

/// Flatten the blocks of several packs into one.
///
/// A pack that carries text but no blocks contributes a single synthetic
/// block. A single pack is returned as-is so its text is never re-joined.
pub fn merge(packs: &[ContextPack], join_with: &str) -> ContextPack {
    if let [single] = packs {
        return single.clone();
    }

    let mut blocks = Vec::new();
    for (index, pack) in packs.iter().enumerate() {
        if pack.blocks.is_empty() {
            if !pack.text.is_empty() {
                blocks.push(Block::new(format!("pack:{index}"), pack.text.clone()));
            }
        } else {
            blocks.extend(pack.blocks.iter().cloned());
        }
    }

    if blocks.is_empty() {
        return ContextPack::empty();
    }
    ContextPack::from_blocks(blocks, join_with)
}
