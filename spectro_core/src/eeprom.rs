//! EEPROM page reader over the three supported request encodings.

use spectro_traits::channels::{self, opcodes};
use tracing::{debug, warn};

use crate::descriptor::{MAX_PAGES, PAGE_SIZE, Page};
use crate::error::DeviceError;
use crate::link::DeviceLink;

const CHUNK_SIZE: usize = 16;
const CHUNKS_PER_PAGE: usize = PAGE_SIZE / CHUNK_SIZE;
/// Attempts per page before the read is abandoned.
pub const PAGE_ATTEMPTS: u32 = 3;

/// How page reads are addressed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EepromProtocol {
    /// `[page]` to `eepromCmd`, whole page from `eepromData`.
    #[default]
    Usb,
    /// `[page, subpage]` to `eepromCmd`, 16 bytes per read.
    Ble,
    /// `{0x00, page, offset}` under group `0xFF 0x01` on the generic channel.
    Generic,
}

impl std::str::FromStr for EepromProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "usb" => Ok(Self::Usb),
            "ble" => Ok(Self::Ble),
            "generic" => Ok(Self::Generic),
            other => Err(format!("unknown eeprom protocol '{other}'")),
        }
    }
}

/// Read `MAX_PAGES` pages. Each page is one gate hold; retryable failures
/// are attempted up to `PAGE_ATTEMPTS` times per page.
pub fn read_pages(link: &DeviceLink, protocol: EepromProtocol) -> Result<Vec<Page>, DeviceError> {
    let mut pages = Vec::with_capacity(MAX_PAGES);
    for page in 0..MAX_PAGES as u8 {
        let mut attempt = 0;
        let data = loop {
            attempt += 1;
            match read_page(link, protocol, page) {
                Ok(p) => break p,
                Err(e) if e.is_retryable() && attempt < PAGE_ATTEMPTS => {
                    warn!(page, attempt, error = %e, "EEPROM page read failed; retrying");
                }
                Err(e) => return Err(e),
            }
        };
        pages.push(data);
    }
    debug!(pages = pages.len(), ?protocol, "EEPROM read complete");
    Ok(pages)
}

fn read_page(link: &DeviceLink, protocol: EepromProtocol, page: u8) -> Result<Page, DeviceError> {
    let _gate = link.lock("eeprom read")?;
    let mut out = [0u8; PAGE_SIZE];
    match protocol {
        EepromProtocol::Usb => {
            link.write(channels::EEPROM_CMD, &[page])?;
            let data = link.read(channels::EEPROM_DATA)?;
            fill(&mut out, 0, &data, PAGE_SIZE, page)?;
        }
        EepromProtocol::Ble => {
            for sub in 0..CHUNKS_PER_PAGE {
                link.write(channels::EEPROM_CMD, &[page, sub as u8])?;
                let data = link.read(channels::EEPROM_DATA)?;
                fill(&mut out, sub * CHUNK_SIZE, &data, CHUNK_SIZE, page)?;
            }
        }
        EepromProtocol::Generic => {
            for chunk in 0..CHUNKS_PER_PAGE {
                let offset = (chunk * CHUNK_SIZE) as u8;
                let data = link.generic_request(opcodes::EEPROM_READ, &[0x00, page, offset])?;
                fill(&mut out, chunk * CHUNK_SIZE, &data, CHUNK_SIZE, page)?;
            }
        }
    }
    Ok(out)
}

fn fill(out: &mut Page, at: usize, data: &[u8], want: usize, page: u8) -> Result<(), DeviceError> {
    if data.len() < want {
        return Err(DeviceError::ProtocolViolation(format!(
            "EEPROM page {page}: got {} bytes, expected {want}",
            data.len()
        )));
    }
    out[at..at + want].copy_from_slice(&data[..want]);
    Ok(())
}
