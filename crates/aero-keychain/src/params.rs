//! Network parameters consumed by the keychain and the address manager.

/// Groups the address-encoding version bytes and BIP0044 constants for a
/// network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetParams {
    /// Human-readable network name.
    pub name: &'static str,
    /// Version byte for pay-to-pubkey-hash addresses.
    pub p2pkh_addr_id: u8,
    /// Version byte for pay-to-script-hash addresses.
    pub p2sh_addr_id: u8,
    /// Version byte for WIF-encoded private keys.
    pub wif_id: u8,
    /// Version prefix for serialized extended private keys.
    pub hd_priv_version: [u8; 4],
    /// Version prefix for serialized extended public keys.
    pub hd_pub_version: [u8; 4],
    /// BIP0044 coin type.
    pub hd_coin_type: u32,
}

/// Main network parameters.
pub const MAINNET: NetParams = NetParams {
    name: "mainnet",
    p2pkh_addr_id: 0x00,
    p2sh_addr_id: 0x05,
    wif_id: 0x80,
    hd_priv_version: [0x04, 0x88, 0xad, 0xe4], // xprv
    hd_pub_version: [0x04, 0x88, 0xb2, 0x1e],  // xpub
    hd_coin_type: 0,
};

/// Test network parameters.
pub const TESTNET: NetParams = NetParams {
    name: "testnet",
    p2pkh_addr_id: 0x6f,
    p2sh_addr_id: 0xc4,
    wif_id: 0xef,
    hd_priv_version: [0x04, 0x35, 0x83, 0x94], // tprv
    hd_pub_version: [0x04, 0x35, 0x87, 0xcf],  // tpub
    hd_coin_type: 1,
};
