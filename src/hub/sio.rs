//! SIO command-frame reconstruction.
//!
//! The emulator emits one logical SIO command as three events: COMMAND_ON
//! with the device id, a DATA_BLOCK with `{cmd, aux1, aux2}`, and
//! COMMAND_OFF_SYNC with the checksum. Each piece is forwarded to the
//! peripherals the moment it arrives, so this state machine never gates
//! traffic; it exists to log the assembled command and to notice when
//! COMMAND_OFF_SYNC shows up out of context.

/// A fully reconstructed SIO command frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SioFrame {
    /// SIO device id.
    pub device: u8,
    /// Command byte.
    pub command: u8,
    /// First auxiliary byte.
    pub aux1: u8,
    /// Second auxiliary byte.
    pub aux2: u8,
    /// Checksum byte from COMMAND_OFF_SYNC.
    pub checksum: u8,
}

/// Reconstruction state for the in-flight SIO command.
///
/// Any out-of-sequence host event resets the machine to `Empty`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PendingSioCommand {
    /// No command sequence in progress.
    #[default]
    Empty,
    /// COMMAND_ON seen; waiting for the command frame bytes.
    HaveDevice {
        /// Device id from COMMAND_ON.
        device: u8,
    },
    /// Command frame bytes seen; waiting for COMMAND_OFF_SYNC.
    HaveFrame {
        /// Device id from COMMAND_ON.
        device: u8,
        /// Command byte.
        command: u8,
        /// First auxiliary byte.
        aux1: u8,
        /// Second auxiliary byte.
        aux2: u8,
    },
}

impl PendingSioCommand {
    /// COMMAND_ON starts a new sequence, abandoning any partial one.
    pub fn on_command_on(&mut self, device: u8) {
        *self = Self::HaveDevice { device };
    }

    /// A host DATA_BLOCK advances the sequence when it is the expected
    /// three-byte command frame; anything else resets. Returns whether
    /// the block fit the sequence.
    pub fn on_data_block(&mut self, data: &[u8]) -> bool {
        match *self {
            Self::HaveDevice { device } if data.len() == 3 => {
                *self = Self::HaveFrame {
                    device,
                    command: data[0],
                    aux1: data[1],
                    aux2: data[2],
                };
                true
            }
            Self::Empty => false,
            _ => {
                *self = Self::Empty;
                false
            }
        }
    }

    /// COMMAND_OFF_SYNC consumes the sequence. Returns the assembled
    /// frame when the checksum arrived in context, `None` otherwise;
    /// the state is `Empty` afterwards either way.
    pub fn on_command_off_sync(&mut self, checksum: u8) -> Option<SioFrame> {
        let frame = match *self {
            Self::HaveFrame {
                device,
                command,
                aux1,
                aux2,
            } => Some(SioFrame {
                device,
                command,
                aux1,
                aux2,
                checksum,
            }),
            _ => None,
        };
        *self = Self::Empty;
        frame
    }

    /// Any other host event breaks the sequence. Returns true when a
    /// partial sequence was actually abandoned.
    pub fn reset(&mut self) -> bool {
        let was_pending = *self != Self::Empty;
        *self = Self::Empty;
        was_pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_sequence_reconstructs_frame() {
        let mut pending = PendingSioCommand::default();
        pending.on_command_on(0x31);
        assert!(pending.on_data_block(&[0x53, 0x00, 0x00]));

        let frame = pending.on_command_off_sync(0x53).unwrap();
        assert_eq!(
            frame,
            SioFrame {
                device: 0x31,
                command: 0x53,
                aux1: 0x00,
                aux2: 0x00,
                checksum: 0x53,
            }
        );
        assert_eq!(pending, PendingSioCommand::Empty);
    }

    #[test]
    fn test_command_off_sync_without_sequence() {
        let mut pending = PendingSioCommand::default();
        assert!(pending.on_command_off_sync(0x53).is_none());
    }

    #[test]
    fn test_data_block_of_wrong_length_resets() {
        let mut pending = PendingSioCommand::default();
        pending.on_command_on(0x31);
        assert!(!pending.on_data_block(&[0x53, 0x00, 0x00, 0x53]));
        assert_eq!(pending, PendingSioCommand::Empty);
    }

    #[test]
    fn test_stray_data_block_is_ignored() {
        let mut pending = PendingSioCommand::default();
        assert!(!pending.on_data_block(&[1, 2, 3]));
        assert_eq!(pending, PendingSioCommand::Empty);
    }

    #[test]
    fn test_second_data_block_breaks_sequence() {
        let mut pending = PendingSioCommand::default();
        pending.on_command_on(0x31);
        assert!(pending.on_data_block(&[0x52, 0x01, 0x00]));
        assert!(!pending.on_data_block(&[0x52, 0x02, 0x00]));
        assert!(pending.on_command_off_sync(0x53).is_none());
    }

    #[test]
    fn test_command_on_restarts_sequence() {
        let mut pending = PendingSioCommand::default();
        pending.on_command_on(0x31);
        pending.on_command_on(0x70);
        assert!(pending.on_data_block(&[0x53, 0x00, 0x00]));
        assert_eq!(pending.on_command_off_sync(0x23).unwrap().device, 0x70);
    }

    #[test]
    fn test_reset_reports_abandoned_sequence() {
        let mut pending = PendingSioCommand::default();
        assert!(!pending.reset());
        pending.on_command_on(0x31);
        assert!(pending.reset());
        assert!(!pending.reset());
    }
}
