//! Command buffer recording state machine and image layout tracking.
//!
//! Recording and execution are temporally decoupled: a tracked image layout
//! always reflects the last command *recorded*, not the last command
//! executed. The state machine below is consulted by every backend that
//! records commands explicitly; misusing it is a programming error and
//! panics rather than returning an error.

/// States of a recordable command buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandBufferState {
    /// Freshly allocated or reset; ready to begin recording.
    Initial,
    /// Between begin and end of recording.
    Recording,
    /// Recording ended; ready to submit.
    Executable,
    /// Submitted; executing or queued on the GPU.
    Pending,
    /// A one-shot buffer whose execution completed; must be reset.
    Invalid,
}

/// Tracked layout of an image, advanced at render-pass exit and at explicit
/// layout-transition commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageLayout {
    /// Contents undefined; any transition away discards.
    #[default]
    Undefined,
    /// Writable as a color attachment.
    ColorAttachment,
    /// Readable by shaders.
    ShaderRead,
    /// Source of a transfer operation.
    TransferSrc,
    /// Destination of a transfer operation.
    TransferDst,
    /// Ready to present to a surface.
    Present,
}

/// The recording state machine for one command buffer.
///
/// A render-pass run is a strictly nested sub-state of [`Recording`]:
/// entering requires the buffer to be recording and not already inside a
/// pass; leaving returns to plain recording. Ending recording while inside
/// a pass is a violation.
///
/// [`Recording`]: CommandBufferState::Recording
#[derive(Debug)]
pub struct CommandStateMachine {
    state: CommandBufferState,
    in_render_pass: bool,
    one_shot: bool,
}

impl CommandStateMachine {
    /// Create a state machine for a reusable command buffer.
    pub fn new() -> Self {
        Self {
            state: CommandBufferState::Initial,
            in_render_pass: false,
            one_shot: false,
        }
    }

    /// Create a state machine for a one-shot command buffer: after its
    /// execution completes it becomes invalid instead of returning to
    /// initial.
    pub fn new_one_shot() -> Self {
        Self {
            one_shot: true,
            ..Self::new()
        }
    }

    /// Current state.
    pub fn state(&self) -> CommandBufferState {
        self.state
    }

    /// Whether a render-pass run is currently open.
    pub fn in_render_pass(&self) -> bool {
        self.in_render_pass
    }

    /// Begin recording.
    ///
    /// # Panics
    ///
    /// Panics unless the buffer is in the initial state.
    pub fn begin_recording(&mut self) {
        assert_eq!(
            self.state,
            CommandBufferState::Initial,
            "command buffer state machine violation: begin_recording in state {:?}",
            self.state
        );
        self.state = CommandBufferState::Recording;
    }

    /// Enter a render-pass run.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is not recording, or a pass is already open.
    pub fn begin_render_pass(&mut self) {
        assert_eq!(
            self.state,
            CommandBufferState::Recording,
            "command buffer state machine violation: begin_render_pass in state {:?}",
            self.state
        );
        assert!(
            !self.in_render_pass,
            "command buffer state machine violation: render-pass runs cannot nest"
        );
        self.in_render_pass = true;
    }

    /// Leave the current render-pass run. This is the single point at which
    /// the caller advances the output image's tracked layout to the pass's
    /// declared final layout.
    ///
    /// # Panics
    ///
    /// Panics if no render-pass run is open.
    pub fn end_render_pass(&mut self) {
        assert!(
            self.in_render_pass,
            "command buffer state machine violation: end_render_pass without an open pass"
        );
        self.in_render_pass = false;
    }

    /// End recording.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is not recording or a render-pass run is open.
    pub fn end_recording(&mut self) {
        assert_eq!(
            self.state,
            CommandBufferState::Recording,
            "command buffer state machine violation: end_recording in state {:?}",
            self.state
        );
        assert!(
            !self.in_render_pass,
            "command buffer state machine violation: end_recording inside a render-pass run"
        );
        self.state = CommandBufferState::Executable;
    }

    /// Mark the buffer submitted.
    ///
    /// # Panics
    ///
    /// Panics unless the buffer is executable.
    pub fn submit(&mut self) {
        assert_eq!(
            self.state,
            CommandBufferState::Executable,
            "command buffer state machine violation: submit in state {:?}",
            self.state
        );
        self.state = CommandBufferState::Pending;
    }

    /// Mark the pending execution complete (the completion fence signalled).
    /// Reusable buffers return to initial; one-shot buffers become invalid.
    ///
    /// # Panics
    ///
    /// Panics unless the buffer is pending.
    pub fn complete(&mut self) {
        assert_eq!(
            self.state,
            CommandBufferState::Pending,
            "command buffer state machine violation: complete in state {:?}",
            self.state
        );
        self.state = if self.one_shot {
            CommandBufferState::Invalid
        } else {
            CommandBufferState::Initial
        };
    }

    /// Reset the buffer back to initial.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is pending; work in flight cannot be reset.
    pub fn reset(&mut self) {
        assert_ne!(
            self.state,
            CommandBufferState::Pending,
            "command buffer state machine violation: reset while pending"
        );
        self.state = CommandBufferState::Initial;
        self.in_render_pass = false;
    }
}

impl Default for CommandStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-image tracked layout, mutated exactly at render-pass exit and at
/// explicit layout-transition commands.
#[derive(Debug, Default)]
pub struct TrackedLayout {
    layout: ImageLayout,
}

impl TrackedLayout {
    /// Create a tracker starting at [`ImageLayout::Undefined`].
    pub fn new() -> Self {
        Self::default()
    }

    /// The layout as of the last command recorded.
    pub fn current(&self) -> ImageLayout {
        self.layout
    }

    /// Record a transition to a new layout and return the old one.
    pub fn transition_to(&mut self, new_layout: ImageLayout) -> ImageLayout {
        std::mem::replace(&mut self.layout, new_layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_reusable_cycle() {
        let mut sm = CommandStateMachine::new();
        assert_eq!(sm.state(), CommandBufferState::Initial);
        sm.begin_recording();
        sm.begin_render_pass();
        assert!(sm.in_render_pass());
        sm.end_render_pass();
        sm.end_recording();
        assert_eq!(sm.state(), CommandBufferState::Executable);
        sm.submit();
        assert_eq!(sm.state(), CommandBufferState::Pending);
        sm.complete();
        assert_eq!(sm.state(), CommandBufferState::Initial);
    }

    #[test]
    fn one_shot_invalidates_after_completion() {
        let mut sm = CommandStateMachine::new_one_shot();
        sm.begin_recording();
        sm.end_recording();
        sm.submit();
        sm.complete();
        assert_eq!(sm.state(), CommandBufferState::Invalid);
    }

    #[test]
    #[should_panic(expected = "render-pass runs cannot nest")]
    fn nested_render_pass_panics() {
        let mut sm = CommandStateMachine::new();
        sm.begin_recording();
        sm.begin_render_pass();
        sm.begin_render_pass();
    }

    #[test]
    #[should_panic(expected = "end_recording inside a render-pass run")]
    fn end_recording_inside_pass_panics() {
        let mut sm = CommandStateMachine::new();
        sm.begin_recording();
        sm.begin_render_pass();
        sm.end_recording();
    }

    #[test]
    #[should_panic(expected = "begin_render_pass in state")]
    fn render_pass_outside_recording_panics() {
        let mut sm = CommandStateMachine::new();
        sm.begin_render_pass();
    }

    #[test]
    #[should_panic(expected = "reset while pending")]
    fn reset_while_pending_panics() {
        let mut sm = CommandStateMachine::new();
        sm.begin_recording();
        sm.end_recording();
        sm.submit();
        sm.reset();
    }

    #[test]
    fn layout_tracking() {
        let mut tracked = TrackedLayout::new();
        assert_eq!(tracked.current(), ImageLayout::Undefined);
        let old = tracked.transition_to(ImageLayout::ColorAttachment);
        assert_eq!(old, ImageLayout::Undefined);
        let old = tracked.transition_to(ImageLayout::Present);
        assert_eq!(old, ImageLayout::ColorAttachment);
        assert_eq!(tracked.current(), ImageLayout::Present);
    }
}
