//! Helpers shared by the capture and playback device threads

use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use cpal::{SampleFormat, SampleRate, SupportedStreamConfigRange};

use crate::{Error, Result};

/// How long a device thread gets to report that its stream is live
pub const OPEN_TIMEOUT: Duration = Duration::from_secs(3);

/// Whether `range` can run an f32 stream with `channels` at `rate`
///
/// Stream callbacks are written against f32, so other sample formats are skipped.
pub fn supports_f32(range: &SupportedStreamConfigRange, channels: u16, rate: SampleRate) -> bool {
    range.sample_format() == SampleFormat::F32
        && range.channels() == channels
        && range.min_sample_rate() <= rate
        && range.max_sample_rate() >= rate
}

/// Wait for a device thread to report its stream
///
/// The wait is bounded; on failure the thread is left to exit on its own
/// once its stop sender is dropped, never joined.
pub fn wait_ready(ready: &std_mpsc::Receiver<Result<()>>, timeout: Duration) -> Result<()> {
    match ready.recv_timeout(timeout) {
        Ok(result) => result,
        Err(std_mpsc::RecvTimeoutError::Timeout) => {
            Err(Error::Audio(format!("audio device not ready after {timeout:?}")))
        }
        Err(std_mpsc::RecvTimeoutError::Disconnected) => {
            Err(Error::Audio("audio thread exited unexpectedly".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use cpal::SupportedBufferSize;

    use super::*;

    fn range(channels: u16, format: SampleFormat) -> SupportedStreamConfigRange {
        SupportedStreamConfigRange::new(
            channels,
            SampleRate(8_000),
            SampleRate(48_000),
            SupportedBufferSize::Unknown,
            format,
        )
    }

    #[test]
    fn only_f32_ranges_are_usable() {
        let rate = SampleRate(16_000);
        assert!(supports_f32(&range(1, SampleFormat::F32), 1, rate));
        assert!(!supports_f32(&range(1, SampleFormat::I16), 1, rate));
        assert!(!supports_f32(&range(1, SampleFormat::U16), 1, rate));
        assert!(!supports_f32(&range(2, SampleFormat::F32), 1, rate));
        assert!(!supports_f32(&range(1, SampleFormat::F32), 1, SampleRate(96_000)));
    }

    #[test]
    fn ready_result_is_passed_through() {
        let (tx, rx) = std_mpsc::sync_channel(1);
        tx.send(Ok(())).unwrap();
        assert!(wait_ready(&rx, OPEN_TIMEOUT).is_ok());

        tx.send(Err(Error::Audio("no input device available".to_string())))
            .unwrap();
        let err = wait_ready(&rx, OPEN_TIMEOUT).unwrap_err();
        assert!(err.to_string().contains("no input device"));
    }

    #[test]
    fn silent_thread_times_out() {
        let (_tx, rx) = std_mpsc::sync_channel::<Result<()>>(1);
        let started = std::time::Instant::now();

        assert!(wait_ready(&rx, Duration::from_millis(20)).is_err());
        assert!(started.elapsed() < OPEN_TIMEOUT);
    }

    #[test]
    fn vanished_thread_is_an_error() {
        let (tx, rx) = std_mpsc::sync_channel::<Result<()>>(1);
        drop(tx);
        assert!(wait_ready(&rx, OPEN_TIMEOUT).is_err());
    }
}
