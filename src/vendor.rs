//! OUI prefixes of devices that get an extended lease period.
//!
//! Nintendo consoles drop off the network when handed short DHCP leases, so
//! any client whose MAC carries one of these vendor prefixes is leased for a
//! full hour instead of the configured default.

/// Nintendo OUI assignments. Must stay sorted; membership is a binary search.
pub const NINTENDO_OUI_PREFIXES: [[u8; 3]; 55] = [
    [0x00, 0x09, 0xbf],
    [0x00, 0x16, 0x56],
    [0x00, 0x17, 0xab],
    [0x00, 0x19, 0x1d],
    [0x00, 0x19, 0xfd],
    [0x00, 0x1a, 0xe9],
    [0x00, 0x1b, 0x7a],
    [0x00, 0x1b, 0xea],
    [0x00, 0x1c, 0xbe],
    [0x00, 0x1d, 0xbc],
    [0x00, 0x1e, 0x35],
    [0x00, 0x1e, 0xa9],
    [0x00, 0x1f, 0x32],
    [0x00, 0x1f, 0xc5],
    [0x00, 0x21, 0x47],
    [0x00, 0x21, 0xbd],
    [0x00, 0x22, 0x4c],
    [0x00, 0x22, 0xaa],
    [0x00, 0x22, 0xd7],
    [0x00, 0x23, 0x31],
    [0x00, 0x23, 0xcc],
    [0x00, 0x24, 0x1e],
    [0x00, 0x24, 0x44],
    [0x00, 0x24, 0xf3],
    [0x00, 0x25, 0xa0],
    [0x00, 0x26, 0x59],
    [0x00, 0x27, 0x09],
    [0x04, 0x03, 0xd6],
    [0x18, 0x2a, 0x7b],
    [0x2c, 0x10, 0xc1],
    [0x34, 0xaf, 0x2c],
    [0x40, 0xd2, 0x8a],
    [0x40, 0xf4, 0x07],
    [0x58, 0xbd, 0xa3],
    [0x5c, 0x52, 0x1e],
    [0x64, 0xb5, 0xc6],
    [0x78, 0xa2, 0xa0],
    [0x7c, 0xbb, 0x8a],
    [0x8c, 0x56, 0xc5],
    [0x8c, 0xcd, 0xe8],
    [0x98, 0xb6, 0xe9],
    [0x9c, 0xe6, 0x35],
    [0xa4, 0x38, 0xcc],
    [0xa4, 0x5c, 0x27],
    [0xa4, 0xc0, 0xe1],
    [0xb8, 0x8a, 0xec],
    [0xb8, 0xae, 0x6e],
    [0xcc, 0x9e, 0x00],
    [0xcc, 0xfb, 0x65],
    [0xd8, 0x6b, 0xf7],
    [0xdc, 0x68, 0xeb],
    [0xe0, 0x0c, 0x7f],
    [0xe0, 0xe7, 0x51],
    [0xe8, 0x4e, 0xce],
    [0xec, 0xc4, 0x0d],
];

/// Reports whether `prefix` belongs to a vendor that needs long leases.
pub fn is_nintendo_oui(prefix: &[u8; 3]) -> bool {
    NINTENDO_OUI_PREFIXES.binary_search(prefix).is_ok()
}
