//! Frame-in-flight pacing bookkeeping.
//!
//! The pacing algorithm reconciles two independent indices: the *frame slot*
//! (cycling `0..N` where `N` is the frames-in-flight count) and the
//! *swapchain image index* returned by acquisition, which need not match the
//! slot. [`FramePacing`] carries the pure bookkeeping; the backends supply
//! the fence and semaphore operations around it.
//!
//! Per frame, for slot `f`:
//! 1. wait the in-flight fence of `f`;
//! 2. acquire the next image, signalling the slot's image-available
//!    semaphore; call the result `i`;
//! 3. if another slot's fence still owns image `i`, wait that fence too
//!    (possible when the image count exceeds the frame count);
//! 4. claim image `i` for slot `f`;
//! 5. unsignal the fence of `f` and submit with it as completion fence;
//! 6. present, waiting the slot's render-finished semaphore;
//! 7. advance to the next slot.

/// Number of frames that may be in flight simultaneously.
pub const FRAMES_IN_FLIGHT: usize = 2;

/// Bookkeeping for frame slots and swapchain image ownership.
#[derive(Debug)]
pub struct FramePacing {
    frame_count: usize,
    current_frame: usize,
    /// Which fence slot currently owns each swapchain image, if any.
    images_in_flight: Vec<Option<usize>>,
    /// Which frame slot last rendered to each image, for dependent-wait
    /// lookups.
    image_index_at_frame: Vec<Option<usize>>,
}

impl FramePacing {
    /// Create pacing state for `frame_count` frames in flight.
    ///
    /// # Panics
    ///
    /// Panics if `frame_count` is zero.
    pub fn new(frame_count: usize) -> Self {
        assert!(frame_count > 0, "frames-in-flight count must be non-zero");
        Self {
            frame_count,
            current_frame: 0,
            images_in_flight: Vec::new(),
            image_index_at_frame: Vec::new(),
        }
    }

    /// Size the per-image tracking arrays to the swapchain's image count.
    /// Existing ownership entries are cleared; call this after (re)creating
    /// a swapchain, once no frames are in flight.
    pub fn bind_images(&mut self, image_count: usize) {
        self.images_in_flight = vec![None; image_count];
        self.image_index_at_frame = vec![None; image_count];
    }

    /// Number of frames in flight.
    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// The current frame slot.
    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    /// The fence slot that still owns `image_index`, if any. The caller must
    /// wait on that slot's fence before reusing the image (step 3).
    pub fn slot_owning_image(&self, image_index: usize) -> Option<usize> {
        self.images_in_flight.get(image_index).copied().flatten()
    }

    /// Claim `image_index` for the current frame slot (step 4).
    ///
    /// # Panics
    ///
    /// Panics if `bind_images` has not sized the tracking arrays to cover
    /// `image_index`.
    pub fn claim_image(&mut self, image_index: usize) {
        assert!(
            image_index < self.images_in_flight.len(),
            "image index {image_index} out of range; bind_images was given {} images",
            self.images_in_flight.len()
        );
        self.images_in_flight[image_index] = Some(self.current_frame);
        self.image_index_at_frame[image_index] = Some(self.current_frame);
    }

    /// The frame slot that last rendered to `image_index`, if it ever was
    /// rendered to. Used for dependent waits that outlive image ownership.
    pub fn slot_that_rendered_image(&self, image_index: usize) -> Option<usize> {
        self.image_index_at_frame
            .get(image_index)
            .copied()
            .flatten()
    }

    /// Release every image owned by `slot`. Call after waiting that slot's
    /// in-flight fence: the wait proves the slot's prior work completed, so
    /// its images are free and must not trigger a second dependent wait on
    /// a fence that has since been reused.
    pub fn release_slot(&mut self, slot: usize) {
        for owner in self.images_in_flight.iter_mut() {
            if *owner == Some(slot) {
                *owner = None;
            }
        }
    }

    /// Advance to the next frame slot (step 7) and return it.
    pub fn advance(&mut self) -> usize {
        self.current_frame = (self.current_frame + 1) % self.frame_count;
        self.current_frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_rotation_wraps() {
        let mut pacing = FramePacing::new(2);
        assert_eq!(pacing.current_frame(), 0);
        assert_eq!(pacing.advance(), 1);
        assert_eq!(pacing.advance(), 0);
        assert_eq!(pacing.advance(), 1);
    }

    #[test]
    fn image_ownership_tracking() {
        let mut pacing = FramePacing::new(2);
        pacing.bind_images(3);
        assert_eq!(pacing.slot_owning_image(0), None);

        // Slot 0 takes image 1.
        pacing.claim_image(1);
        assert_eq!(pacing.slot_owning_image(1), Some(0));
        pacing.advance();

        // Slot 1 takes image 2; image 1 still owned by slot 0.
        pacing.claim_image(2);
        assert_eq!(pacing.slot_owning_image(2), Some(1));
        assert_eq!(pacing.slot_owning_image(1), Some(0));
        pacing.advance();

        // Slot 0 comes around and reclaims image 1.
        pacing.claim_image(1);
        assert_eq!(pacing.slot_owning_image(1), Some(0));
        assert_eq!(pacing.slot_that_rendered_image(1), Some(0));
    }

    #[test]
    fn releasing_a_slot_frees_its_images() {
        let mut pacing = FramePacing::new(2);
        pacing.bind_images(3);
        pacing.claim_image(0);
        pacing.advance();
        pacing.claim_image(1);

        // Waiting slot 0's fence frees image 0 but not slot 1's image.
        pacing.release_slot(0);
        assert_eq!(pacing.slot_owning_image(0), None);
        assert_eq!(pacing.slot_owning_image(1), Some(1));
    }

    #[test]
    fn rebinding_clears_ownership() {
        let mut pacing = FramePacing::new(2);
        pacing.bind_images(2);
        pacing.claim_image(0);
        pacing.bind_images(3);
        assert_eq!(pacing.slot_owning_image(0), None);
        assert_eq!(pacing.slot_that_rendered_image(0), None);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn claiming_unbound_image_panics() {
        let mut pacing = FramePacing::new(2);
        pacing.bind_images(1);
        pacing.claim_image(1);
    }

    #[test]
    #[should_panic(expected = "non-zero")]
    fn zero_frames_in_flight_panics() {
        let _ = FramePacing::new(0);
    }
}
