/// Character-device major number reserved for the diag terminals.
pub const DIAG_MAJOR: u32 = 185;

/// Line settings applied to every diag terminal when it is created.
///
/// The diag stream is binary, so the defaults switch off every form of
/// input and output processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalSettings {
    /// Line speed in bits per second. Default: 115200.
    pub baud: u32,
    /// Data bits per character. Default: 8.
    pub data_bits: u8,
    /// Enable the receiver (`CREAD`). Default: true.
    pub receiver_enabled: bool,
    /// Ignore break conditions on input (`IGNBRK`). Default: true.
    pub ignore_break: bool,
    /// Output post-processing (`OPOST` and friends). Default: false.
    pub output_processing: bool,
    /// Canonical (line-buffered) input. Default: false.
    pub canonical: bool,
    /// Echo input characters. Default: false.
    pub echo: bool,
}

impl Default for TerminalSettings {
    fn default() -> Self {
        Self {
            baud: 115_200,
            data_bits: 8,
            receiver_enabled: true,
            ignore_break: true,
            output_processing: false,
            canonical: false,
            echo: false,
        }
    }
}

#[cfg(unix)]
impl TerminalSettings {
    /// Control-mode flags as a termios `c_cflag` value.
    ///
    /// Returns `None` when `baud` or `data_bits` has no termios constant.
    pub fn c_cflag(&self) -> Option<libc::tcflag_t> {
        let speed = match self.baud {
            9_600 => libc::B9600,
            19_200 => libc::B19200,
            38_400 => libc::B38400,
            57_600 => libc::B57600,
            115_200 => libc::B115200,
            230_400 => libc::B230400,
            _ => return None,
        };
        let size = match self.data_bits {
            5 => libc::CS5,
            6 => libc::CS6,
            7 => libc::CS7,
            8 => libc::CS8,
            _ => return None,
        };
        let mut flags = speed as libc::tcflag_t | size;
        if self.receiver_enabled {
            flags |= libc::CREAD;
        }
        Some(flags)
    }

    /// Input-mode flags as a termios `c_iflag` value.
    pub fn c_iflag(&self) -> libc::tcflag_t {
        if self.ignore_break {
            libc::IGNBRK
        } else {
            0
        }
    }

    /// Output-mode flags as a termios `c_oflag` value.
    pub fn c_oflag(&self) -> libc::tcflag_t {
        if self.output_processing {
            libc::OPOST
        } else {
            0
        }
    }

    /// Local-mode flags as a termios `c_lflag` value.
    pub fn c_lflag(&self) -> libc::tcflag_t {
        let mut flags = 0;
        if self.canonical {
            flags |= libc::ICANON;
        }
        if self.echo {
            flags |= libc::ECHO;
        }
        flags
    }
}

/// Terminal driver registration parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Driver name reported to the terminal layer. Default: `tty_diag`.
    pub driver_name: String,
    /// Device-node name prefix. Default: `ttydiag`.
    pub device_name: String,
    /// Character-device major. Default: [`DIAG_MAJOR`].
    pub major: u32,
    /// First minor number. Default: 0.
    pub minor_start: u32,
    /// Line settings for every created terminal.
    pub settings: TerminalSettings,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            driver_name: "tty_diag".to_string(),
            device_name: "ttydiag".to_string(),
            major: DIAG_MAJOR,
            minor_start: 0,
            settings: TerminalSettings::default(),
        }
    }
}

impl DriverConfig {
    /// Minor number of endpoint `index`.
    pub fn minor(&self, index: usize) -> u32 {
        self.minor_start.saturating_add(index as u32)
    }

    /// Device-node name of endpoint `index`, e.g. `ttydiag0`. Nodes are
    /// named by index; `minor_start` only shifts the minor numbers.
    pub fn device_node(&self, index: usize) -> String {
        format!("{}{}", self.device_name, index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_nodes_are_named_by_index() {
        let config = DriverConfig {
            minor_start: 4,
            ..DriverConfig::default()
        };
        assert_eq!(config.device_node(0), "ttydiag0");
        assert_eq!(config.device_node(1), "ttydiag1");
        assert_eq!(config.minor(0), 4);
        assert_eq!(config.minor(1), 5);
        assert_eq!(DriverConfig::default().device_node(1), "ttydiag1");
    }

    #[cfg(unix)]
    #[test]
    fn default_settings_are_raw_8n1() {
        let settings = TerminalSettings::default();
        let cflag = settings.c_cflag().expect("115200 8N1 has a termios encoding");
        assert_eq!(cflag & libc::CSIZE, libc::CS8);
        assert_ne!(cflag & libc::CREAD, 0);
        assert_eq!(settings.c_iflag(), libc::IGNBRK);
        assert_eq!(settings.c_oflag(), 0);
        assert_eq!(settings.c_lflag(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn unsupported_line_speed_has_no_cflag() {
        let settings = TerminalSettings {
            baud: 12_345,
            ..TerminalSettings::default()
        };
        assert!(settings.c_cflag().is_none());
    }
}
