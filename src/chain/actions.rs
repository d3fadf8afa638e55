//! System and token contract actions used by the wallet

use super::asset::Asset;
use super::keys::PublicKey;
use super::name::Name;
use super::serializer::{Action, Packer, PermissionLevel};

pub const SYSTEM_CONTRACT: Name = Name::from_static("eosio");
pub const TOKEN_CONTRACT: Name = Name::from_static("eosio.token");

const TRANSFER: Name = Name::from_static("transfer");
const BUYRAMBYTES: Name = Name::from_static("buyrambytes");
const BUYRAM: Name = Name::from_static("buyram");
const NEWACCOUNT: Name = Name::from_static("newaccount");
const DELEGATEBW: Name = Name::from_static("delegatebw");

fn action(account: Name, name: Name, auth: &PermissionLevel, data: Packer) -> Action {
    Action {
        account,
        name,
        authorization: vec![auth.clone()],
        data: data.into_bytes(),
    }
}

pub fn transfer(auth: &PermissionLevel, from: Name, to: Name, quantity: &Asset, memo: &str) -> Action {
    let mut p = Packer::new();
    p.name(from).name(to).asset(quantity).string(memo);
    action(TOKEN_CONTRACT, TRANSFER, auth, p)
}

pub fn buy_ram_bytes(auth: &PermissionLevel, payer: Name, receiver: Name, bytes: u32) -> Action {
    let mut p = Packer::new();
    p.name(payer).name(receiver).u32(bytes);
    action(SYSTEM_CONTRACT, BUYRAMBYTES, auth, p)
}

pub fn buy_ram(auth: &PermissionLevel, payer: Name, receiver: Name, quantity: &Asset) -> Action {
    let mut p = Packer::new();
    p.name(payer).name(receiver).asset(quantity);
    action(SYSTEM_CONTRACT, BUYRAM, auth, p)
}

/// Single-key authority with threshold 1
fn pack_key_authority(p: &mut Packer, key: &PublicKey) {
    p.u32(1);
    p.varuint32(1);
    p.public_key(key).u16(1);
    // accounts, waits
    p.varuint32(0).varuint32(0);
}

pub fn new_account(
    auth: &PermissionLevel,
    creator: Name,
    name: Name,
    owner: &PublicKey,
    active: &PublicKey,
) -> Action {
    let mut p = Packer::new();
    p.name(creator).name(name);
    pack_key_authority(&mut p, owner);
    pack_key_authority(&mut p, active);
    action(SYSTEM_CONTRACT, NEWACCOUNT, auth, p)
}

pub fn delegate_bw(
    auth: &PermissionLevel,
    from: Name,
    receiver: Name,
    stake_net: &Asset,
    stake_cpu: &Asset,
    transfer: bool,
) -> Action {
    let mut p = Packer::new();
    p.name(from)
        .name(receiver)
        .asset(stake_net)
        .asset(stake_cpu)
        .bool(transfer);
    action(SYSTEM_CONTRACT, DELEGATEBW, auth, p)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth() -> PermissionLevel {
        PermissionLevel::new(Name::new("alice").unwrap(), Name::new("active").unwrap())
    }

    #[test]
    fn test_contract_constants() {
        assert_eq!(SYSTEM_CONTRACT, Name::new("eosio").unwrap());
        assert_eq!(TOKEN_CONTRACT, Name::new("eosio.token").unwrap());
    }

    #[test]
    fn test_transfer_payload() {
        let alice = Name::new("alice").unwrap();
        let bob = Name::new("bob").unwrap();
        let quantity = Asset::eos(1.0).unwrap();
        let act = transfer(&auth(), alice, bob, &quantity, "hi");

        assert_eq!(act.account, TOKEN_CONTRACT);
        assert_eq!(act.name, Name::new("transfer").unwrap());
        // from + to + amount + symbol + memo
        assert_eq!(act.data.len(), 8 + 8 + 8 + 8 + 3);
        assert_eq!(&act.data[16..24], &10000i64.to_le_bytes());
    }

    #[test]
    fn test_buy_ram_bytes_payload() {
        let alice = Name::new("alice").unwrap();
        let act = buy_ram_bytes(&auth(), alice, alice, 4096);
        assert_eq!(act.data.len(), 20);
        assert_eq!(&act.data[16..], &4096u32.to_le_bytes());
    }

    #[test]
    fn test_new_account_payload() {
        let key = crate::chain::keys::PrivateKey::generate().public_key();
        let act = new_account(
            &auth(),
            Name::new("alice").unwrap(),
            Name::new("abcdefgh1234").unwrap(),
            &key,
            &key,
        );
        // creator + name + 2 * (threshold + keys len + key type + point + weight + accounts + waits)
        assert_eq!(act.data.len(), 16 + 2 * (4 + 1 + 1 + 33 + 2 + 1 + 1));
    }
}
