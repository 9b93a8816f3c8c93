//! Property-based tests using proptest.

use aero_crypto::{CryptoKey, ScryptOptions, SecretKey};
use aero_keychain::MAINNET;
use aero_wallet::{WalletError, EXTERNAL_BRANCH, INTERNAL_BRANCH, NO_ADDRESS_INDEX};
use proptest::prelude::*;

use crate::harness::{create_test_wallet, PRIV_PASS};

fn arb_payload() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..256)
}

/// Maximum under the sentinel wraparound ordering used by the index
/// bookkeeping, where `NO_ADDRESS_INDEX + 1 == 0` sorts lowest.
fn max_wrapping(a: u32, b: u32) -> u32 {
    if a.wrapping_add(1) > b.wrapping_add(1) {
        a
    } else {
        b
    }
}

proptest! {
    #[test]
    fn crypto_key_roundtrip(payload in arb_payload()) {
        let key = CryptoKey::generate().unwrap();
        let ciphertext = key.encrypt(&payload).unwrap();
        prop_assert_eq!(key.decrypt(&ciphertext).unwrap(), payload);
    }

    #[test]
    fn crypto_key_detects_bitflips(
        payload in arb_payload(),
        byte in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let key = CryptoKey::generate().unwrap();
        let mut ciphertext = key.encrypt(&payload).unwrap();
        let i = byte.index(ciphertext.len());
        ciphertext[i] ^= 1 << bit;
        prop_assert!(key.decrypt(&ciphertext).is_err());
    }

    #[test]
    fn secret_key_marshal_roundtrip(
        passphrase in prop::collection::vec(any::<u8>(), 0..32),
        payload in arb_payload(),
    ) {
        let options = ScryptOptions::for_testing();
        let key = SecretKey::new(&passphrase, &options).unwrap();
        let ciphertext = key.encrypt(&payload).unwrap();

        let mut restored = SecretKey::unmarshal(&key.marshal()).unwrap();
        restored.derive(&passphrase).unwrap();
        prop_assert_eq!(restored.decrypt(&ciphertext).unwrap(), payload);
    }
}

proptest! {
    // Wallet-level cases pay for a store and a KDF each; keep them few.
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn mark_indexes_monotone(
        ops in prop::collection::vec((any::<bool>(), any::<bool>(), 0u32..50), 1..20),
    ) {
        let wallet = create_test_wallet();
        wallet.manager.unlock(PRIV_PASS).unwrap();

        // Model of the account row bookkeeping, indexed external/internal.
        let mut used = [NO_ADDRESS_INDEX; 2];
        let mut returned = [0u32; 2];

        for (is_used, internal, child) in ops {
            let branch = if internal { INTERNAL_BRANCH } else { EXTERNAL_BRANCH };
            let slot = usize::from(internal);

            if is_used {
                wallet
                    .store
                    .update(|tx| wallet.manager.mark_used_child_index(tx, 0, branch, child))
                    .unwrap();
                if child.wrapping_add(1) >= used[slot].wrapping_add(1) {
                    used[slot] = child;
                    for k in 0..2 {
                        returned[k] = max_wrapping(used[k], returned[k]);
                    }
                }
            } else {
                wallet
                    .store
                    .update(|tx| {
                        wallet.manager.mark_returned_child_index(tx, 0, branch, child)
                    })
                    .unwrap();
                if child.wrapping_add(1) >= returned[slot].wrapping_add(1) {
                    returned[slot] = max_wrapping(used[slot], child);
                }
            }

            let props = wallet
                .store
                .view(|tx| wallet.manager.account_properties(tx, 0))
                .unwrap();
            prop_assert_eq!(props.last_used_external_index, used[0]);
            prop_assert_eq!(props.last_used_internal_index, used[1]);
            prop_assert_eq!(props.last_returned_external_index, returned[0]);
            prop_assert_eq!(props.last_returned_internal_index, returned[1]);

            // Returned never falls below used under the wraparound order.
            prop_assert!(
                props.last_returned_external_index.wrapping_add(1)
                    >= props.last_used_external_index.wrapping_add(1)
            );
            prop_assert!(
                props.last_returned_internal_index.wrapping_add(1)
                    >= props.last_used_internal_index.wrapping_add(1)
            );
        }
    }

    #[test]
    fn sync_creates_dense_prefix(target in 0u32..16) {
        let wallet = create_test_wallet();
        wallet.manager.unlock(PRIV_PASS).unwrap();

        wallet
            .store
            .update(|tx| {
                wallet
                    .manager
                    .sync_account_to_addr_index(tx, 0, EXTERNAL_BRANCH, target)
            })
            .unwrap();

        let branch_xpub = wallet
            .store
            .view(|tx| wallet.manager.account_branch_xpub(tx, 0, EXTERNAL_BRANCH))
            .unwrap();
        wallet
            .store
            .view(|tx| {
                for child in 0..=target {
                    let addr = branch_xpub.child(child).unwrap().address(&MAINNET).unwrap();
                    assert!(wallet.manager.exists_address(tx, &addr.hash160())?);
                    assert_eq!(wallet.manager.addr_account(tx, &addr)?, 0);
                }
                Ok::<_, WalletError>(())
            })
            .unwrap();
    }
}
