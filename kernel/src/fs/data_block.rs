//! Data-block allocation over the on-disk free bitmap.

use nv6_fs_types::{BITS_PER_BLOCK, BitmapBlock, BlockNo};

use crate::error::{Error, Result};

use super::{Dev, Tx, superblock};

/// Allocates a zeroed data block.
pub fn alloc(tx: &Tx<true>, dev: Dev) -> Result<BlockNo> {
    let sb = superblock();
    let total = sb.size as usize;

    for base in (0..total).step_by(BITS_PER_BLOCK) {
        let mut b = tx.get(dev, sb.bitmap_block(base));
        let Some(bit) = (0..BITS_PER_BLOCK)
            .take_while(|bit| base + bit < total)
            .find(|&bit| !b.view::<BitmapBlock>().is_set(bit))
        else {
            continue;
        };
        b.view_mut::<BitmapBlock>().set(bit);
        drop(b);

        let bno = BlockNo::new((base + bit) as u32);
        // hand out blocks zeroed; stale contents must not resurface
        tx.get_zeroed(dev, bno);
        return Ok(bno);
    }
    Err(Error::OutOfBlocks)
}

/// Returns a data block to the free bitmap.
pub fn free(tx: &Tx<true>, dev: Dev, bno: BlockNo) {
    let sb = superblock();
    let mut b = tx.get(dev, sb.bitmap_block(bno.as_index()));
    let bit = bno.as_index() % BITS_PER_BLOCK;
    assert!(
        b.view::<BitmapBlock>().is_set(bit),
        "freeing a free block {bno:?}"
    );
    b.view_mut::<BitmapBlock>().clear(bit);
}
