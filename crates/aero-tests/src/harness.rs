//! Shared test fixtures.

use aero_keychain::{NetParams, MAINNET};
use aero_store::Store;
use aero_wallet::{Manager, ScryptOptions};
use tempfile::TempDir;

/// The seed used by every test wallet.
pub const TEST_SEED: [u8; 16] = [
    0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e,
    0x0f,
];

/// Public passphrase for test wallets.
pub const PUB_PASS: &[u8] = b"pub";

/// Private passphrase for test wallets.
pub const PRIV_PASS: &[u8] = b"priv";

/// Cheap scrypt parameters so tests spend their time on wallet logic.
pub fn fast_scrypt() -> ScryptOptions {
    ScryptOptions::for_testing()
}

/// A wallet backed by a throwaway store.
pub struct TestWallet {
    /// The backing store.
    pub store: Store,
    /// The opened manager.
    pub manager: Manager,
    /// Network parameters the wallet was created with.
    pub params: &'static NetParams,
    _tmp: TempDir,
}

impl TestWallet {
    /// Close the manager and open a fresh one from the same store.
    pub fn reopen(&mut self) {
        self.manager.close();
        self.manager = Manager::open(&self.store, PUB_PASS, self.params).unwrap();
    }
}

/// Create a fresh wallet on a temporary store and open it.
pub fn create_test_wallet() -> TestWallet {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let store = Store::open(tmp.path()).unwrap();
    Manager::create(&store, &TEST_SEED, PUB_PASS, PRIV_PASS, &MAINNET, &fast_scrypt()).unwrap();
    let manager = Manager::open(&store, PUB_PASS, &MAINNET).unwrap();
    TestWallet {
        store,
        manager,
        params: &MAINNET,
        _tmp: tmp,
    }
}

/// Route manager logs to the test writer so failures show the transition
/// log.  Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("debug")
        .try_init();
}
