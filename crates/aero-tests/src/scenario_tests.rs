//! End-to-end scenarios exercising the manager through its public API.

use aero_keychain::{ExtendedKey, Wif, HARDENED_KEY_START, MAINNET};
use aero_store::Store;
use aero_wallet::{
    CryptoKeyKind, ManagedAddress, Manager, WalletError, DEFAULT_ACCOUNT_NUM, EXTERNAL_BRANCH,
    IMPORTED_ADDR_ACCOUNT, IMPORTED_ADDR_ACCOUNT_NAME,
};
use tempfile::TempDir;

use crate::harness::{create_test_wallet, fast_scrypt, PRIV_PASS, PUB_PASS, TEST_SEED};

// The scalar 1 with the compressed flag, for import tests.
const TEST_WIF: &str = "KwDiBf89QgGbjEhKnhXJuH7LrciVrZi3qYjgd9M7rFU73sVHnoWn";

#[test]
fn test_bootstrap_then_open() {
    let mut wallet = create_test_wallet();
    wallet.reopen();

    assert!(wallet.manager.is_locked());
    assert!(!wallet.manager.watching_only());

    wallet
        .store
        .view(|tx| {
            assert_eq!(wallet.manager.last_account(tx)?, 0);
            assert_eq!(wallet.manager.account_name(tx, DEFAULT_ACCOUNT_NUM)?, "default");
            assert_eq!(
                wallet.manager.account_name(tx, IMPORTED_ADDR_ACCOUNT)?,
                IMPORTED_ADDR_ACCOUNT_NAME
            );
            Ok::<_, WalletError>(())
        })
        .unwrap();

    // The default account xpub is the neutered m/44'/0'/0' for the seed.
    let expected = ExtendedKey::new_master(&TEST_SEED, &MAINNET)
        .unwrap()
        .child(44 + HARDENED_KEY_START)
        .unwrap()
        .child(MAINNET.hd_coin_type + HARDENED_KEY_START)
        .unwrap()
        .child(HARDENED_KEY_START)
        .unwrap()
        .neuter()
        .unwrap()
        .serialize();
    let stored = wallet
        .store
        .view(|tx| wallet.manager.master_pubkey(tx, DEFAULT_ACCOUNT_NUM))
        .unwrap();
    assert_eq!(stored, expected);
}

#[test]
fn test_wrong_private_passphrase() {
    let wallet = create_test_wallet();

    let err = wallet.manager.unlock(b"wrong").unwrap_err();
    assert!(matches!(err, WalletError::WrongPassphrase(_)));
    assert!(wallet.manager.is_locked());
}

#[test]
fn test_sync_and_lookup() {
    let wallet = create_test_wallet();
    wallet.manager.unlock(PRIV_PASS).unwrap();

    wallet
        .store
        .update(|tx| {
            wallet
                .manager
                .sync_account_to_addr_index(tx, 0, EXTERNAL_BRANCH, 5)
        })
        .unwrap();

    let branch_xpub = wallet
        .store
        .view(|tx| wallet.manager.account_branch_xpub(tx, 0, EXTERNAL_BRANCH))
        .unwrap();
    let addr_3 = branch_xpub.child(3).unwrap().address(&MAINNET).unwrap();

    let managed = wallet
        .store
        .view(|tx| wallet.manager.address(tx, &addr_3))
        .unwrap();
    match managed {
        ManagedAddress::Chained {
            account,
            branch,
            index,
            ref address,
            ..
        } => {
            assert_eq!(account, 0);
            assert_eq!(branch, EXTERNAL_BRANCH);
            assert_eq!(index, 3);
            assert_eq!(address, &addr_3);
        }
        other => panic!("expected chained address, got {other:?}"),
    }

    // Every child up to the target exists and maps back to the account.
    wallet
        .store
        .view(|tx| {
            for child in 0..=5u32 {
                let addr = branch_xpub.child(child).unwrap().address(&MAINNET).unwrap();
                assert!(wallet.manager.exists_address(tx, &addr.hash160())?);
                assert_eq!(wallet.manager.addr_account(tx, &addr)?, 0);
            }
            Ok::<_, WalletError>(())
        })
        .unwrap();
}

#[test]
fn test_import_and_private_key() {
    let wallet = create_test_wallet();
    wallet.manager.unlock(PRIV_PASS).unwrap();

    let wif = Wif::decode(TEST_WIF).unwrap();
    let managed = wallet
        .store
        .update(|tx| wallet.manager.import_private_key(tx, &wif))
        .unwrap();
    assert!(managed.imported());

    wallet
        .store
        .view(|tx| {
            let guard = wallet.manager.private_key(tx, managed.address())?;
            assert_eq!(guard.key(), wif.priv_key());
            Ok::<_, WalletError>(())
        })
        .unwrap();

    let err = wallet
        .store
        .update(|tx| wallet.manager.import_private_key(tx, &wif))
        .unwrap_err();
    assert!(matches!(err, WalletError::DuplicateAddress(_)));

    // The import survives a reopen.
    let mut wallet = wallet;
    wallet.reopen();
    wallet.manager.unlock(PRIV_PASS).unwrap();
    wallet
        .store
        .view(|tx| {
            let guard = wallet.manager.private_key(tx, managed.address())?;
            assert_eq!(guard.key(), wif.priv_key());
            Ok::<_, WalletError>(())
        })
        .unwrap();
}

#[test]
fn test_change_passphrase_then_lock() {
    let wallet = create_test_wallet();

    wallet
        .store
        .update(|tx| {
            wallet
                .manager
                .change_passphrase(tx, PRIV_PASS, b"priv2", true, &fast_scrypt())
        })
        .unwrap();

    assert!(matches!(
        wallet.manager.unlock(PRIV_PASS).unwrap_err(),
        WalletError::WrongPassphrase(_)
    ));
    wallet.manager.unlock(b"priv2").unwrap();
    wallet.manager.lock().unwrap();
    wallet.manager.unlock(b"priv2").unwrap();
}

#[test]
fn test_watching_only_conversion() {
    let wallet = create_test_wallet();
    wallet.manager.unlock(PRIV_PASS).unwrap();

    let wif = Wif::decode(TEST_WIF).unwrap();
    let imported = wallet
        .store
        .update(|tx| wallet.manager.import_private_key(tx, &wif))
        .unwrap();

    wallet
        .store
        .update(|tx| wallet.manager.convert_to_watching_only(tx))
        .unwrap();

    assert!(matches!(
        wallet.manager.unlock(PRIV_PASS).unwrap_err(),
        WalletError::WatchingOnly
    ));
    assert!(matches!(
        wallet
            .store
            .view(|tx| wallet.manager.private_key(tx, imported.address()))
            .unwrap_err(),
        WalletError::WatchingOnly
    ));

    // Address lookups still succeed.
    let managed = wallet
        .store
        .view(|tx| wallet.manager.address(tx, imported.address()))
        .unwrap();
    assert_eq!(managed.address(), imported.address());

    // Conversion is irreversible across reopen; private decrypts fail too.
    let mut wallet = wallet;
    wallet.reopen();
    assert!(wallet.manager.watching_only());
    assert!(matches!(
        wallet.manager.encrypt(CryptoKeyKind::Private, b"x").unwrap_err(),
        WalletError::WatchingOnly
    ));
}

#[test]
fn test_empty_private_passphrase_rejected() {
    let tmp = TempDir::new().unwrap();
    let store = Store::open(tmp.path()).unwrap();
    let err = Manager::create(&store, &TEST_SEED, PUB_PASS, b"", &MAINNET, &fast_scrypt())
        .unwrap_err();
    assert!(matches!(err, WalletError::EmptyPassphrase));
}

#[test]
fn test_open_missing_manager() {
    let tmp = TempDir::new().unwrap();
    let store = Store::open(tmp.path()).unwrap();
    let err = Manager::open(&store, PUB_PASS, &MAINNET).unwrap_err();
    assert!(matches!(err, WalletError::NotFound(_)));
}

#[test]
fn test_for_each_account_and_addresses() {
    let wallet = create_test_wallet();
    wallet.manager.unlock(PRIV_PASS).unwrap();

    wallet
        .store
        .update(|tx| wallet.manager.new_account(tx, "savings"))
        .unwrap();
    wallet
        .store
        .update(|tx| {
            wallet
                .manager
                .sync_account_to_addr_index(tx, 1, EXTERNAL_BRANCH, 2)
        })
        .unwrap();

    let mut accounts = Vec::new();
    wallet
        .store
        .view(|tx| {
            wallet.manager.for_each_account(tx, |account| {
                accounts.push(account);
                Ok(())
            })
        })
        .unwrap();
    assert_eq!(accounts, vec![0, 1, IMPORTED_ADDR_ACCOUNT]);

    // The callback may re-enter the manager.
    let mut seen = 0;
    wallet
        .store
        .view(|tx| {
            wallet.manager.for_each_account_address(tx, 1, |managed| {
                seen += 1;
                assert_eq!(wallet.manager.addr_account(tx, managed.address())?, 1);
                Ok(())
            })
        })
        .unwrap();
    assert_eq!(seen, 3);

    let mut active = 0;
    wallet
        .store
        .view(|tx| {
            wallet.manager.for_each_active_address(tx, |_| {
                active += 1;
                Ok(())
            })
        })
        .unwrap();
    assert_eq!(active, 3);
}

#[test]
fn test_next_to_use_pool_indexes() {
    let wallet = create_test_wallet();

    wallet
        .store
        .view(|tx| {
            assert_eq!(
                wallet
                    .manager
                    .next_to_use_addr_pool_index(tx, false, DEFAULT_ACCOUNT_NUM)?,
                0
            );
            assert_eq!(
                wallet
                    .manager
                    .next_to_use_addr_pool_index(tx, true, DEFAULT_ACCOUNT_NUM)?,
                0
            );
            Ok::<_, WalletError>(())
        })
        .unwrap();

    wallet
        .store
        .update(|tx| {
            wallet
                .manager
                .put_next_to_use_addr_pool_index(tx, false, DEFAULT_ACCOUNT_NUM, 12)
        })
        .unwrap();
    assert_eq!(
        wallet
            .store
            .view(|tx| wallet
                .manager
                .next_to_use_addr_pool_index(tx, false, DEFAULT_ACCOUNT_NUM))
            .unwrap(),
        12
    );
}
