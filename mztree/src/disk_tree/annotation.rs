//! Annotation channel: the single write path for point labels.
//!
//! Labels are written in batches. A batch is validated as a whole before
//! any label changes and is applied under the page store's exclusive lock,
//! so concurrent queries observe either none or all of it. Geometry,
//! intensity and the node structure are never touched.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::{debug, info};

use super::tree_impl::TreeCore;
use crate::errors::{MzTreeError, MzTreeResult};
use crate::point::{Label, PointId, MAX_LABEL};

/// Exclusive label writer of an open tree.
///
/// At most one channel exists per tree at a time; dropping it releases the
/// slot. Obtained from [`MzTree::annotation_channel`](crate::MzTree::annotation_channel).
pub struct AnnotationChannel {
    core: Arc<TreeCore>,
    batches: u64,
    labels_written: u64,
}

impl AnnotationChannel {
    pub(crate) fn acquire(core: Arc<TreeCore>) -> MzTreeResult<Self> {
        if !core.store.has_payload() {
            return Err(MzTreeError::InvalidOperation(
                "index was built without a payload column; labels cannot be stored".into(),
            ));
        }
        if core
            .writer_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(MzTreeError::InvalidOperation(
                "an annotation channel is already open for this tree".into(),
            ));
        }
        debug!("Annotation channel opened on {:?}", core.paths.index);
        Ok(Self {
            core,
            batches: 0,
            labels_written: 0,
        })
    }

    /// Labels a single point. Equivalent to a batch of one.
    pub fn write_label(&mut self, id: PointId, label: Label) -> MzTreeResult<()> {
        self.write_labels(&[(id, Some(label))])
    }

    /// Applies a batch of label changes atomically; `None` unlabels.
    ///
    /// Fails without changing anything if any address is outside the index
    /// or any label exceeds [`MAX_LABEL`].
    pub fn write_labels(&mut self, batch: &[(PointId, Option<Label>)]) -> MzTreeResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        for (id, label) in batch {
            if let Some(label) = label {
                if *label > MAX_LABEL {
                    return Err(MzTreeError::InvalidParameter(format!(
                        "label {} for point {} exceeds the maximum label {}",
                        label, id, MAX_LABEL
                    )));
                }
            }
        }

        let mut writer = self.core.store.label_writer()?;
        for (id, _) in batch {
            writer.check_id(*id)?;
        }
        for (id, label) in batch {
            writer.set_label(*id, *label)?;
        }
        if batch.iter().any(|(_, label)| label.is_none()) {
            self.reset_ranking();
        }
        drop(writer);

        self.batches += 1;
        self.labels_written += batch.len() as u64;
        Ok(())
    }

    /// Unlabels every point carrying `label`, returning how many changed.
    pub fn clear_label(&mut self, label: Label) -> MzTreeResult<u64> {
        let mut writer = self.core.store.label_writer()?;
        let cleared = writer.clear_label(label)?;
        if cleared > 0 {
            self.reset_ranking();
        }
        drop(writer);
        debug!("Cleared label {} from {} points", label, cleared);
        Ok(cleared)
    }

    /// Forces label writes to disk.
    pub fn flush(&self) -> MzTreeResult<()> {
        self.core.store.label_writer()?.flush()
    }

    pub fn batches(&self) -> u64 {
        self.batches
    }

    pub fn labels_written(&self) -> u64 {
        self.labels_written
    }

    fn reset_ranking(&self) {
        if let Some(ranking) = self.core.ranking.as_ref() {
            ranking.reset_cursors();
        }
    }
}

impl Drop for AnnotationChannel {
    fn drop(&mut self) {
        if self.labels_written > 0 {
            info!(
                "Annotation channel closed after {} labels in {} batches",
                self.labels_written, self.batches
            );
        }
        self.core.writer_active.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for AnnotationChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnnotationChannel")
            .field("index", &self.core.paths.index)
            .field("batches", &self.batches)
            .field("labels_written", &self.labels_written)
            .finish()
    }
}
