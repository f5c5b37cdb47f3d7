/*!
Screen recognition.

- `sampler`: the `ScreenSampler` capability, the `Frame` it returns and the xcap
  backed `ScreenCapture` (plus `StaticSampler` for fixed screenshots).
- `matcher`: `TemplateMatcher`, pure normalized cross-correlation over frames.
- `engine`: `RecognitionEngine`, which serializes captures and adds batch,
  find-all and the cancellable `wait_for` poll.

Positions in results are logical screen coordinates, already corrected for the
frame's origin and scale factor.
*/

pub mod engine;
pub mod matcher;
pub mod sampler;

pub use engine::{RecognitionEngine, WaitOutcome, WaitResult};
pub use matcher::TemplateMatcher;
pub use sampler::{Frame, ScreenCapture, ScreenSampler, StaticSampler};
