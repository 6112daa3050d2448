#![no_main]
use libfuzzer_sys::fuzz_target;
use spectro_core::DeviceDescriptor;
use spectro_core::descriptor::{MAX_PAGES, PAGE_SIZE, Page};

fuzz_target!(|data: &[u8]| {
    let pages: Vec<Page> = data
        .chunks_exact(PAGE_SIZE)
        .take(MAX_PAGES + 1)
        .map(|c| {
            let mut p = [0u8; PAGE_SIZE];
            p.copy_from_slice(c);
            p
        })
        .collect();
    if let Ok(d) = DeviceDescriptor::parse(&pages) {
        // Everything the parser lets through must be usable downstream.
        assert!(d.pixel_count > 0);
        let _ = d.wavelengths();
        let _ = d.to_pages();
    }
});
