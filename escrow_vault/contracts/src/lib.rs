#![no_std]

use soroban_sdk::{
    contract, contractimpl, contracttype, contracterror, symbol_short,
    token, Address, Env,
};

// ============================================================================
// Types
// ============================================================================

/// Which of a loan's two custodial balances an operation targets.
#[contracttype]
#[derive(Clone, Debug, PartialEq)]
pub enum EscrowKind {
    Principal,
    Collateral,
}

#[contracttype]
pub enum DataKey {
    Admin,
    Engine,
    Asset,
    Principal(Address, u64),
    Collateral(Address, u64),
    Fees,
}

#[contracterror]
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(u32)]
pub enum Error {
    AlreadyInitialized = 1,
    NotEngine = 2,
    ZeroAmount = 3,
    InsufficientEscrowBalance = 4,
    Overflow = 5,
}

/// Custodian of per-loan principal and collateral balances. Only the
/// settlement engine contract may move funds; a loan is addressed by its
/// natural key `(borrower, loan_id)` so no index is needed.
#[contract]
pub struct EscrowVaultContract;

#[contractimpl]
impl EscrowVaultContract {

    pub fn initialize(env: Env, admin: Address, asset: Address) -> Result<(), Error> {
        if env.storage().instance().has(&DataKey::Admin) {
            return Err(Error::AlreadyInitialized);
        }
        admin.require_auth();

        env.storage().instance().set(&DataKey::Admin, &admin);
        env.storage().instance().set(&DataKey::Asset, &asset);
        env.storage().instance().set(&DataKey::Fees, &0i128);
        Ok(())
    }

    /// Point the vault at the engine contract. Deployed after the engine,
    /// so this is a separate admin step rather than an init parameter.
    pub fn set_engine(env: Env, engine: Address) -> Result<(), Error> {
        let admin: Address = env.storage().instance().get(&DataKey::Admin).unwrap();
        admin.require_auth();
        env.storage().instance().set(&DataKey::Engine, &engine);
        Ok(())
    }

    // ========================================================================
    // Engine Interface
    // ========================================================================

    /// Pull `amount` of the accepted asset from `from` into the named
    /// escrow balance of loan `(borrower, loan_id)`.
    pub fn deposit(
        env: Env,
        borrower: Address,
        loan_id: u64,
        kind: EscrowKind,
        from: Address,
        amount: i128,
    ) -> Result<i128, Error> {
        Self::require_engine(&env)?;
        if amount <= 0 { return Err(Error::ZeroAmount); }

        let asset: Address = env.storage().instance().get(&DataKey::Asset).unwrap();
        let tc = token::Client::new(&env, &asset);
        tc.transfer(&from, &env.current_contract_address(), &amount);

        let key = Self::balance_key(&borrower, loan_id, &kind);
        let bal: i128 = env.storage().persistent().get(&key).unwrap_or(0);
        let new_bal = bal.checked_add(amount).ok_or(Error::Overflow)?;
        env.storage().persistent().set(&key, &new_bal);

        env.events().publish((symbol_short!("esc_in"), borrower), (loan_id, kind, amount));
        Ok(new_bal)
    }

    /// Pay `amount` out of the named escrow balance to `destination`.
    pub fn release(
        env: Env,
        borrower: Address,
        loan_id: u64,
        kind: EscrowKind,
        destination: Address,
        amount: i128,
    ) -> Result<i128, Error> {
        Self::require_engine(&env)?;
        if amount <= 0 { return Err(Error::ZeroAmount); }

        let key = Self::balance_key(&borrower, loan_id, &kind);
        let bal: i128 = env.storage().persistent().get(&key).unwrap_or(0);
        if amount > bal { return Err(Error::InsufficientEscrowBalance); }

        let asset: Address = env.storage().instance().get(&DataKey::Asset).unwrap();
        let tc = token::Client::new(&env, &asset);
        tc.transfer(&env.current_contract_address(), &destination, &amount);

        let new_bal = bal - amount;
        env.storage().persistent().set(&key, &new_bal);

        env.events().publish((symbol_short!("esc_out"), borrower), (loan_id, kind, amount));
        Ok(new_bal)
    }

    /// Re-attribute `amount` from a loan's principal balance to the
    /// protocol fee bucket. Accounting only, no token movement.
    pub fn move_to_fees(
        env: Env,
        borrower: Address,
        loan_id: u64,
        amount: i128,
    ) -> Result<(), Error> {
        Self::require_engine(&env)?;
        if amount <= 0 { return Err(Error::ZeroAmount); }

        let key = DataKey::Principal(borrower.clone(), loan_id);
        let bal: i128 = env.storage().persistent().get(&key).unwrap_or(0);
        if amount > bal { return Err(Error::InsufficientEscrowBalance); }
        env.storage().persistent().set(&key, &(bal - amount));

        let fees: i128 = env.storage().instance().get(&DataKey::Fees).unwrap_or(0);
        let new_fees = fees.checked_add(amount).ok_or(Error::Overflow)?;
        env.storage().instance().set(&DataKey::Fees, &new_fees);

        env.events().publish((symbol_short!("fee"), borrower), (loan_id, amount));
        Ok(())
    }

    /// Drain accumulated protocol fees to `destination`.
    pub fn withdraw_fees(env: Env, destination: Address, amount: i128) -> Result<(), Error> {
        Self::require_engine(&env)?;
        if amount <= 0 { return Err(Error::ZeroAmount); }

        let fees: i128 = env.storage().instance().get(&DataKey::Fees).unwrap_or(0);
        if amount > fees { return Err(Error::InsufficientEscrowBalance); }

        let asset: Address = env.storage().instance().get(&DataKey::Asset).unwrap();
        let tc = token::Client::new(&env, &asset);
        tc.transfer(&env.current_contract_address(), &destination, &amount);

        env.storage().instance().set(&DataKey::Fees, &(fees - amount));
        Ok(())
    }

    // ========================================================================
    // View
    // ========================================================================

    pub fn balance(env: Env, borrower: Address, loan_id: u64, kind: EscrowKind) -> i128 {
        env.storage().persistent()
            .get(&Self::balance_key(&borrower, loan_id, &kind))
            .unwrap_or(0)
    }

    pub fn fees(env: Env) -> i128 {
        env.storage().instance().get(&DataKey::Fees).unwrap_or(0)
    }

    // ========================================================================
    // Internal
    // ========================================================================

    fn balance_key(borrower: &Address, loan_id: u64, kind: &EscrowKind) -> DataKey {
        match kind {
            EscrowKind::Principal => DataKey::Principal(borrower.clone(), loan_id),
            EscrowKind::Collateral => DataKey::Collateral(borrower.clone(), loan_id),
        }
    }

    fn require_engine(env: &Env) -> Result<(), Error> {
        let engine: Address = env.storage().instance().get(&DataKey::Engine)
            .ok_or(Error::NotEngine)?;
        engine.require_auth();
        Ok(())
    }
}
