//! Snapshot-free range and key cursors.
//!
//! Cursors hold no pins between calls: each `next` batch reacquires the
//! read locks, re-descends from the last emitted key, and buffers up to
//! `prefetch` pairs. A batch never ends in the middle of one key's run, so
//! resuming from the remembered key cannot re-emit or skip record ids.

use crate::bucket::BucketPage;
use crate::constants::ENTRY_POINT_INDEX;
use crate::entry_point::EntryPointPage;
use crate::tree::MultiValueIndex;
use ridgeline_common::key::CompositeKey;
use ridgeline_common::rid::RecordId;
use ridgeline_common::Result;
use std::collections::VecDeque;

fn clamp_prefetch(tree: &MultiValueIndex, prefetch: usize) -> usize {
    match prefetch {
        0 => 1,
        n if n > tree.config.cursor_prefetch_limit => tree.config.cursor_prefetch_limit,
        n => n,
    }
}

/// A cursor over `(key, rid)` pairs in either direction.
pub enum RangeCursor<'a> {
    /// Ascending key order.
    Forward(CursorForward<'a>),
    /// Descending key order.
    Backward(CursorBackward<'a>),
}

impl RangeCursor<'_> {
    /// Produces the next pair, refilling the internal buffer as needed.
    pub fn next(&mut self, prefetch: usize) -> Result<Option<(CompositeKey, RecordId)>> {
        match self {
            RangeCursor::Forward(cursor) => cursor.next(prefetch),
            RangeCursor::Backward(cursor) => cursor.next(prefetch),
        }
    }
}

/// Ascending cursor.
pub struct CursorForward<'a> {
    tree: &'a MultiValueIndex,
    from_key: Option<CompositeKey>,
    to_key: Option<CompositeKey>,
    from_inclusive: bool,
    to_inclusive: bool,
    buffer: VecDeque<(CompositeKey, RecordId)>,
    exhausted: bool,
    first_batch: bool,
}

impl<'a> CursorForward<'a> {
    pub(crate) fn new(
        tree: &'a MultiValueIndex,
        from_key: Option<CompositeKey>,
        to_key: Option<CompositeKey>,
        from_inclusive: bool,
        to_inclusive: bool,
    ) -> Self {
        let from_inclusive = from_inclusive || from_key.is_none();
        Self {
            tree,
            from_key,
            to_key,
            from_inclusive,
            to_inclusive,
            buffer: VecDeque::new(),
            exhausted: false,
            first_batch: true,
        }
    }

    /// Produces the next pair in ascending key order.
    pub fn next(&mut self, prefetch: usize) -> Result<Option<(CompositeKey, RecordId)>> {
        if let Some((key, rid)) = self.buffer.pop_front() {
            self.from_key = Some(key.clone());
            self.from_inclusive = false;
            return Ok(Some((key, rid)));
        }

        if self.exhausted {
            return Ok(None);
        }

        self.refill(prefetch)?;

        match self.buffer.pop_front() {
            Some((key, rid)) => {
                self.from_key = Some(key.clone());
                self.from_inclusive = false;
                Ok(Some((key, rid)))
            }
            None => {
                self.exhausted = true;
                Ok(None)
            }
        }
    }

    fn push_entry(&mut self, data: &[u8], slot: usize, key: &CompositeKey) -> Result<()> {
        let mut rids = Vec::new();
        self.tree.fetch_values(data, slot, &mut rids)?;
        for rid in rids {
            self.buffer.push_back((key.clone(), rid));
        }
        Ok(())
    }

    fn refill(&mut self, prefetch: usize) -> Result<()> {
        let op_lock = self.tree.op_lock.clone();
        let _op_lock = op_lock.read();
        let _latch = self.tree.latch.read();
        let prefetch = clamp_prefetch(self.tree, prefetch);

        let (mut page_index, mut item) = match &self.from_key {
            Some(from) => {
                let descent = self.tree.find_bucket(from)?;
                let item = match descent.search {
                    crate::bucket::SlotSearch::Found(index) => {
                        if self.from_inclusive {
                            index
                        } else {
                            index + 1
                        }
                    }
                    crate::bucket::SlotSearch::Insertion(index) => index,
                };
                (descent.page_index as i64, item)
            }
            None => match self.tree.first_item()? {
                Some((page, item)) => (page as i64, item),
                None => return Ok(()),
            },
        };

        let mut last_key: Option<CompositeKey> = None;

        // The first inclusive batch must pick up equal-key entries sitting
        // in left siblings; runs can straddle bucket boundaries.
        if self.first_batch {
            if let Some(from) = self.from_key.clone() {
                if self.from_inclusive && page_index >= 0 {
                    let guard = self
                        .tree
                        .cache
                        .load_for_read(self.tree.file_id, page_index as u32)?;
                    let data = guard.data();
                    let size = BucketPage::size(&data[..]);

                    // Rewind to the start of the run inside this bucket.
                    while item > 0
                        && item <= size
                        && self.tree.bucket_key_at(&data[..], item - 1)? == from
                    {
                        item -= 1;
                    }

                    if item == 0 || size == 0 {
                        let mut left = BucketPage::left_sibling(&data[..]);
                        drop(data);
                        drop(guard);

                        while left >= 0 {
                            let sibling = self
                                .tree
                                .cache
                                .load_for_read(self.tree.file_id, left as u32)?;
                            let sibling_data = sibling.data();
                            let sibling_size = BucketPage::size(&sibling_data[..]);

                            if sibling_size == 0 {
                                left = BucketPage::left_sibling(&sibling_data[..]);
                                continue;
                            }

                            if self.tree.bucket_key_at(&sibling_data[..], sibling_size - 1)?
                                != from
                            {
                                break;
                            }

                            let mut run_start = sibling_size - 1;
                            while run_start > 0
                                && self.tree.bucket_key_at(&sibling_data[..], run_start - 1)?
                                    == from
                            {
                                run_start -= 1;
                            }
                            for slot in run_start..sibling_size {
                                self.push_entry(&sibling_data[..], slot, &from)?;
                                last_key = Some(from.clone());
                            }

                            left = if run_start == 0 {
                                BucketPage::left_sibling(&sibling_data[..])
                            } else {
                                -1
                            };
                        }
                    }
                }
            }
        }
        self.first_batch = false;

        'main: while page_index >= 0 {
            let guard = self
                .tree
                .cache
                .load_for_read(self.tree.file_id, page_index as u32)?;
            let data = guard.data();

            loop {
                if item >= BucketPage::size(&data[..]) {
                    page_index = BucketPage::right_sibling(&data[..]);
                    item = 0;
                    continue 'main;
                }

                let slot = item;
                item += 1;

                let key = self.tree.bucket_key_at(&data[..], slot)?;

                // Keep fetching past the prefetch size while the key run
                // continues so one key never straddles two batches.
                if self.buffer.len() >= prefetch && last_key.as_ref() != Some(&key) {
                    break 'main;
                }

                if let Some(from) = &self.from_key {
                    let out_of_range = if self.from_inclusive {
                        key < *from
                    } else {
                        key <= *from
                    };
                    if out_of_range {
                        continue;
                    }
                }

                if let Some(to) = &self.to_key {
                    let past_end = if self.to_inclusive { key > *to } else { key >= *to };
                    if past_end {
                        break 'main;
                    }
                }

                last_key = Some(key.clone());
                self.push_entry(&data[..], slot, &key)?;
            }
        }

        Ok(())
    }
}

/// Descending cursor.
pub struct CursorBackward<'a> {
    tree: &'a MultiValueIndex,
    from_key: Option<CompositeKey>,
    to_key: Option<CompositeKey>,
    from_inclusive: bool,
    to_inclusive: bool,
    buffer: VecDeque<(CompositeKey, RecordId)>,
    exhausted: bool,
    first_batch: bool,
}

impl<'a> CursorBackward<'a> {
    pub(crate) fn new(
        tree: &'a MultiValueIndex,
        from_key: Option<CompositeKey>,
        to_key: Option<CompositeKey>,
        from_inclusive: bool,
        to_inclusive: bool,
    ) -> Self {
        let to_inclusive = to_inclusive || to_key.is_none();
        Self {
            tree,
            from_key,
            to_key,
            from_inclusive,
            to_inclusive,
            buffer: VecDeque::new(),
            exhausted: false,
            first_batch: true,
        }
    }

    /// Produces the next pair in descending key order.
    pub fn next(&mut self, prefetch: usize) -> Result<Option<(CompositeKey, RecordId)>> {
        if let Some((key, rid)) = self.buffer.pop_front() {
            self.to_key = Some(key.clone());
            self.to_inclusive = false;
            return Ok(Some((key, rid)));
        }

        if self.exhausted {
            return Ok(None);
        }

        self.refill(prefetch)?;

        match self.buffer.pop_front() {
            Some((key, rid)) => {
                self.to_key = Some(key.clone());
                self.to_inclusive = false;
                Ok(Some((key, rid)))
            }
            None => {
                self.exhausted = true;
                Ok(None)
            }
        }
    }

    fn push_entry(&mut self, data: &[u8], slot: usize, key: &CompositeKey) -> Result<()> {
        let mut rids = Vec::new();
        self.tree.fetch_values(data, slot, &mut rids)?;
        for rid in rids {
            self.buffer.push_back((key.clone(), rid));
        }
        Ok(())
    }

    fn refill(&mut self, prefetch: usize) -> Result<()> {
        let op_lock = self.tree.op_lock.clone();
        let _op_lock = op_lock.read();
        let _latch = self.tree.latch.read();
        let prefetch = clamp_prefetch(self.tree, prefetch);

        let (mut page_index, mut item) = match &self.to_key {
            Some(to) => {
                let descent = self.tree.find_bucket(to)?;
                let item = match descent.search {
                    crate::bucket::SlotSearch::Found(index) => {
                        if self.to_inclusive {
                            index as i64
                        } else {
                            index as i64 - 1
                        }
                    }
                    crate::bucket::SlotSearch::Insertion(index) => index as i64 - 1,
                };
                (descent.page_index as i64, item)
            }
            None => match self.tree.last_item()? {
                Some((page, item)) => (page as i64, item as i64),
                None => return Ok(()),
            },
        };

        let mut last_key: Option<CompositeKey> = None;

        // The first inclusive batch must pick up equal-key entries sitting
        // in right siblings.
        if self.first_batch {
            if let Some(to) = self.to_key.clone() {
                if self.to_inclusive && page_index >= 0 {
                    let guard = self
                        .tree
                        .cache
                        .load_for_read(self.tree.file_id, page_index as u32)?;
                    let data = guard.data();
                    let size = BucketPage::size(&data[..]);

                    // Extend to the end of the run inside this bucket.
                    while item >= 0
                        && ((item + 1) as usize) < size
                        && self.tree.bucket_key_at(&data[..], (item + 1) as usize)? == to
                    {
                        item += 1;
                    }

                    if item == size as i64 - 1 || size == 0 {
                        let mut right = BucketPage::right_sibling(&data[..]);
                        drop(data);
                        drop(guard);

                        while right >= 0 {
                            let sibling = self
                                .tree
                                .cache
                                .load_for_read(self.tree.file_id, right as u32)?;
                            let sibling_data = sibling.data();
                            let sibling_size = BucketPage::size(&sibling_data[..]);

                            if sibling_size == 0 {
                                right = BucketPage::right_sibling(&sibling_data[..]);
                                continue;
                            }

                            if self.tree.bucket_key_at(&sibling_data[..], 0)? != to {
                                break;
                            }

                            let mut run_end = 1;
                            while run_end < sibling_size
                                && self.tree.bucket_key_at(&sibling_data[..], run_end)? == to
                            {
                                run_end += 1;
                            }
                            for slot in 0..run_end {
                                self.push_entry(&sibling_data[..], slot, &to)?;
                                last_key = Some(to.clone());
                            }

                            right = if run_end == sibling_size {
                                BucketPage::right_sibling(&sibling_data[..])
                            } else {
                                -1
                            };
                        }
                    }
                }
            }
        }
        self.first_batch = false;

        'main: while page_index >= 0 {
            let guard = self
                .tree
                .cache
                .load_for_read(self.tree.file_id, page_index as u32)?;
            let data = guard.data();

            loop {
                let size = BucketPage::size(&data[..]) as i64;
                if item >= size {
                    item = size - 1;
                }
                if item < 0 {
                    page_index = BucketPage::left_sibling(&data[..]);
                    item = i64::MAX;
                    continue 'main;
                }

                let slot = item as usize;
                item -= 1;

                let key = self.tree.bucket_key_at(&data[..], slot)?;

                if self.buffer.len() >= prefetch && last_key.as_ref() != Some(&key) {
                    break 'main;
                }

                if let Some(to) = &self.to_key {
                    let out_of_range = if self.to_inclusive { key > *to } else { key >= *to };
                    if out_of_range {
                        continue;
                    }
                }

                if let Some(from) = &self.from_key {
                    let past_end = if self.from_inclusive {
                        key < *from
                    } else {
                        key <= *from
                    };
                    if past_end {
                        break 'main;
                    }
                }

                last_key = Some(key.clone());
                self.push_entry(&data[..], slot, &key)?;
            }
        }

        Ok(())
    }
}

/// Cursor over the stored keys in ascending order.
pub struct KeyCursor<'a> {
    tree: &'a MultiValueIndex,
    page_index: i64,
    item: usize,
    buffer: VecDeque<CompositeKey>,
    exhausted: bool,
}

impl<'a> KeyCursor<'a> {
    pub(crate) fn new(tree: &'a MultiValueIndex, start_page: Option<u32>) -> Self {
        Self {
            tree,
            page_index: start_page.map(|p| p as i64).unwrap_or(-1),
            item: 0,
            buffer: VecDeque::new(),
            exhausted: start_page.is_none(),
        }
    }

    /// Produces the next key in ascending order.
    pub fn next(&mut self, prefetch: usize) -> Result<Option<CompositeKey>> {
        if let Some(key) = self.buffer.pop_front() {
            return Ok(Some(key));
        }

        if self.exhausted {
            return Ok(None);
        }

        self.refill(prefetch)?;

        match self.buffer.pop_front() {
            Some(key) => Ok(Some(key)),
            None => {
                self.exhausted = true;
                Ok(None)
            }
        }
    }

    fn refill(&mut self, prefetch: usize) -> Result<()> {
        let op_lock = self.tree.op_lock.clone();
        let _op_lock = op_lock.read();
        let _latch = self.tree.latch.read();
        let prefetch = clamp_prefetch(self.tree, prefetch);

        while self.buffer.len() < prefetch {
            if self.page_index < 0 {
                break;
            }

            // Stop at the allocation watermark: sibling pointers never point
            // past it, but a stale cursor could.
            let pages_size = {
                let guard = self
                    .tree
                    .cache
                    .load_for_read(self.tree.file_id, ENTRY_POINT_INDEX)?;
                let data = guard.data();
                EntryPointPage::pages_size(&data[..])
            };
            if self.page_index > pages_size as i64 {
                self.page_index = -1;
                break;
            }

            let guard = self
                .tree
                .cache
                .load_for_read(self.tree.file_id, self.page_index as u32)?;
            let data = guard.data();
            let size = BucketPage::size(&data[..]);

            if self.item >= size {
                self.page_index = BucketPage::right_sibling(&data[..]);
                self.item = 0;
                continue;
            }

            while self.item < size && self.buffer.len() < prefetch {
                self.buffer
                    .push_back(self.tree.bucket_key_at(&data[..], self.item)?);
                self.item += 1;
            }
        }

        Ok(())
    }
}
