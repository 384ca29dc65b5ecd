#![no_std]

use soroban_sdk::{
    contract, contractimpl, contracttype, contracterror, symbol_short, log,
    Address, Env, IntoVal, Symbol, Vec,
};

// ============================================================================
// Types
// ============================================================================

#[contracttype]
#[derive(Clone, Debug, PartialEq)]
pub enum LoanState {
    Funding,
    Funded,
    Drawn,
    InRepayment,
    Settled,
    Defaulted,
}

#[contracttype]
#[derive(Clone, Debug)]
pub struct Loan {
    pub borrower: Address,
    pub loan_id: u64,
    // Terms, immutable after creation.
    pub requested_amount: i128,
    pub term_secs: u64,
    pub max_apr_bps: i128,
    pub min_collateral_bps: i128,
    pub funding_deadline: u64,
    // Funding state.
    pub funded_amount: i128,
    pub actual_apr_bps: i128,
    // Repayment state.
    pub outstanding_principal: i128,
    pub accrued_interest: i128,
    pub total_repaid_principal: i128,
    pub total_repaid_interest: i128,
    pub last_accrual_ts: u64,
    pub repay_deadline: u64,
    // Escrow balances frozen at the moment of default, so every pro-rata
    // claim is computed from the same base.
    pub escrow_at_default: i128,
    pub collateral_at_default: i128,
    // Set when the default happened while still in `Funding`: shares were
    // never finalized, so payout refunds exact contributions instead.
    pub defaulted_in_funding: bool,
    pub state: LoanState,
}

#[contracttype]
#[derive(Clone, Debug)]
pub struct LenderShare {
    pub lender: Address,
    pub borrower: Address,
    pub loan_id: u64,
    pub principal: i128,
    pub pro_rata_bps: i128,
    pub claimed: bool,
}

/// Read-only credit oracle output, consumed at loan creation. The engine
/// does not verify it; it arrives as an already-attested fact.
#[contracttype]
#[derive(Clone, Debug)]
pub struct CreditSignal {
    pub score: u32,
    pub recommended_min_collateral_bps: i128,
    pub expiry: u64,
}

#[contracttype]
#[derive(Clone, Debug)]
pub struct Config {
    pub admin: Address,
    pub accepted_currency: Address,
    pub fee_bps: i128,
}

// Mirrors the escrow vault's type for cross-contract calls.
#[contracttype]
#[derive(Clone, Debug, PartialEq)]
pub enum EscrowKind {
    Principal,
    Collateral,
}

#[contracttype]
pub enum DataKey {
    Config,
    Escrow,
    Paused,
    TotalLoans,
    Loan(Address, u64),
    Share(Address, u64, Address),
    Lenders(Address, u64),
}

#[contracterror]
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(u32)]
pub enum Error {
    AlreadyInitialized = 1,
    InvalidParam = 2,
    InvalidState = 3,
    InsufficientFunding = 4,
    FundingExpired = 5,
    ExceedsLoanAmount = 6,
    AlreadyClaimed = 7,
    StaleCreditSignal = 8,
    LoanNotFound = 9,
    ShareNotFound = 10,
    LoanExists = 11,
    ContractPaused = 12,
    Overflow = 13,
}

const SECONDS_PER_YEAR: u64 = 31_557_600;
const BPS_DENOM: i128 = 10_000;

#[contract]
pub struct LoanPoolContract;

#[contractimpl]
impl LoanPoolContract {

    pub fn initialize(
        env: Env,
        admin: Address,
        accepted_currency: Address,
        escrow: Address,
        fee_bps: i128,
    ) -> Result<(), Error> {
        if env.storage().instance().has(&DataKey::Config) {
            return Err(Error::AlreadyInitialized);
        }
        admin.require_auth();
        if !(0..=BPS_DENOM).contains(&fee_bps) { return Err(Error::InvalidParam); }

        env.storage().instance().set(&DataKey::Config, &Config {
            admin,
            accepted_currency,
            fee_bps,
        });
        env.storage().instance().set(&DataKey::Escrow, &escrow);
        env.storage().instance().set(&DataKey::Paused, &false);
        env.storage().instance().set(&DataKey::TotalLoans, &0u64);
        Ok(())
    }

    pub fn set_fee_bps(env: Env, fee_bps: i128) -> Result<(), Error> {
        let mut config = Self::config(&env);
        config.admin.require_auth();
        if !(0..=BPS_DENOM).contains(&fee_bps) { return Err(Error::InvalidParam); }
        config.fee_bps = fee_bps;
        env.storage().instance().set(&DataKey::Config, &config);
        Ok(())
    }

    // ========================================================================
    // Loan Creation
    // ========================================================================

    pub fn create_loan_request(
        env: Env,
        borrower: Address,
        loan_id: u64,
        requested_amount: i128,
        term_secs: u64,
        max_apr_bps: i128,
        min_collateral_bps: i128,
        funding_deadline: u64,
        credit: Option<CreditSignal>,
    ) -> Result<Loan, Error> {
        Self::require_not_paused(&env)?;
        borrower.require_auth();

        if requested_amount <= 0 { return Err(Error::InvalidParam); }
        if term_secs == 0 { return Err(Error::InvalidParam); }
        if !(0..=BPS_DENOM).contains(&max_apr_bps) { return Err(Error::InvalidParam); }
        if !(0..=BPS_DENOM).contains(&min_collateral_bps) { return Err(Error::InvalidParam); }

        let now = env.ledger().timestamp();
        if funding_deadline <= now { return Err(Error::InvalidParam); }

        // Credit signal overrides the borrower's collateral floor upward
        // when fresh; expired signals are unusable.
        let mut collateral_bps = min_collateral_bps;
        if let Some(signal) = credit {
            if now > signal.expiry { return Err(Error::StaleCreditSignal); }
            if !(0..=BPS_DENOM).contains(&signal.recommended_min_collateral_bps) {
                return Err(Error::InvalidParam);
            }
            collateral_bps = collateral_bps.max(signal.recommended_min_collateral_bps);
        }

        let key = DataKey::Loan(borrower.clone(), loan_id);
        if env.storage().persistent().has(&key) { return Err(Error::LoanExists); }

        let loan = Loan {
            borrower: borrower.clone(),
            loan_id,
            requested_amount,
            term_secs,
            max_apr_bps,
            min_collateral_bps: collateral_bps,
            funding_deadline,
            funded_amount: 0,
            actual_apr_bps: 0,
            outstanding_principal: 0,
            accrued_interest: 0,
            total_repaid_principal: 0,
            total_repaid_interest: 0,
            last_accrual_ts: 0,
            repay_deadline: 0,
            escrow_at_default: 0,
            collateral_at_default: 0,
            defaulted_in_funding: false,
            state: LoanState::Funding,
        };
        env.storage().persistent().set(&key, &loan);

        let total: u64 = env.storage().instance().get(&DataKey::TotalLoans).unwrap_or(0);
        env.storage().instance().set(&DataKey::TotalLoans, &(total + 1));

        env.events().publish((symbol_short!("create"), borrower), (loan_id, requested_amount));
        Ok(loan)
    }

    // ========================================================================
    // Funding
    // ========================================================================

    /// A lender's contribution. Updates the lender's own share plus the
    /// loan's aggregate counter in one transaction, so the conservation
    /// invariant (share sum == funded_amount) holds after every call no
    /// matter how contributions interleave.
    pub fn lender_fund(
        env: Env,
        borrower: Address,
        loan_id: u64,
        lender: Address,
        amount: i128,
    ) -> Result<Loan, Error> {
        Self::require_not_paused(&env)?;
        lender.require_auth();
        if amount <= 0 { return Err(Error::InvalidParam); }

        let mut loan = Self::loan_internal(&env, &borrower, loan_id)?;
        if loan.state != LoanState::Funding { return Err(Error::InvalidState); }

        let now = env.ledger().timestamp();
        if now > loan.funding_deadline { return Err(Error::FundingExpired); }

        let new_funded = loan.funded_amount.checked_add(amount).ok_or(Error::Overflow)?;
        if new_funded > loan.requested_amount { return Err(Error::ExceedsLoanAmount); }

        let escrow = Self::escrow(&env);
        Self::escrow_deposit(&env, &escrow, &borrower, loan_id, EscrowKind::Principal, &lender, amount);

        loan.funded_amount = new_funded;
        env.storage().persistent().set(&DataKey::Loan(borrower.clone(), loan_id), &loan);

        let share_key = DataKey::Share(borrower.clone(), loan_id, lender.clone());
        match env.storage().persistent().get::<DataKey, LenderShare>(&share_key) {
            Some(mut share) => {
                share.principal = share.principal.checked_add(amount).ok_or(Error::Overflow)?;
                env.storage().persistent().set(&share_key, &share);
            }
            None => {
                let share = LenderShare {
                    lender: lender.clone(),
                    borrower: borrower.clone(),
                    loan_id,
                    principal: amount,
                    pro_rata_bps: 0,
                    claimed: false,
                };
                env.storage().persistent().set(&share_key, &share);

                let lenders_key = DataKey::Lenders(borrower.clone(), loan_id);
                let mut lenders: Vec<Address> = env.storage().persistent()
                    .get(&lenders_key)
                    .unwrap_or(Vec::new(&env));
                lenders.push_back(lender.clone());
                env.storage().persistent().set(&lenders_key, &lenders);
            }
        }

        env.events().publish((symbol_short!("fund"), lender), (borrower, loan_id, amount));
        Ok(loan)
    }

    /// Permissionless rate lock. Reaching full subscription does not
    /// auto-advance the state; this call is the explicit step that does.
    pub fn finalize_funding(env: Env, borrower: Address, loan_id: u64) -> Result<Loan, Error> {
        Self::require_not_paused(&env)?;

        let mut loan = Self::loan_internal(&env, &borrower, loan_id)?;
        if loan.state != LoanState::Funding { return Err(Error::InvalidState); }
        if loan.funded_amount < loan.requested_amount {
            return Err(Error::InsufficientFunding);
        }

        // Lenders do not quote individual rates, so the funding-weighted
        // average degenerates to the borrower's ceiling.
        loan.actual_apr_bps = loan.max_apr_bps;

        let lenders: Vec<Address> = env.storage().persistent()
            .get(&DataKey::Lenders(borrower.clone(), loan_id))
            .unwrap_or(Vec::new(&env));
        for lender in lenders.iter() {
            let share_key = DataKey::Share(borrower.clone(), loan_id, lender.clone());
            let mut share: LenderShare = env.storage().persistent().get(&share_key)
                .ok_or(Error::ShareNotFound)?;
            share.pro_rata_bps = Self::mul_div(share.principal, BPS_DENOM, loan.funded_amount)?;
            env.storage().persistent().set(&share_key, &share);
        }

        loan.state = LoanState::Funded;
        env.storage().persistent().set(&DataKey::Loan(borrower.clone(), loan_id), &loan);

        env.events().publish((symbol_short!("finalize"), borrower), (loan_id, loan.actual_apr_bps));
        Ok(loan)
    }

    // ========================================================================
    // Drawdown
    // ========================================================================

    /// Collateral in, principal out. The `Drawn` leg of the state table is
    /// transient: disbursement and the start of repayment complete in this
    /// one call, so the loan lands in `InRepayment`.
    pub fn drawdown(env: Env, borrower: Address, loan_id: u64) -> Result<Loan, Error> {
        Self::require_not_paused(&env)?;
        borrower.require_auth();

        let mut loan = Self::loan_internal(&env, &borrower, loan_id)?;
        if loan.state != LoanState::Funded { return Err(Error::InvalidState); }
        let now = env.ledger().timestamp();
        if Self::past_term_deadline(&loan, now) { return Err(Error::InvalidState); }

        let escrow = Self::escrow(&env);

        let required_collateral =
            Self::mul_div(loan.requested_amount, loan.min_collateral_bps, BPS_DENOM)?;
        if required_collateral > 0 {
            Self::escrow_deposit(
                &env, &escrow, &borrower, loan_id,
                EscrowKind::Collateral, &borrower, required_collateral,
            );
        }

        Self::escrow_release(
            &env, &escrow, &borrower, loan_id,
            EscrowKind::Principal, &borrower, loan.funded_amount,
        );

        loan.outstanding_principal = loan.requested_amount;
        loan.last_accrual_ts = now;
        loan.repay_deadline = now + loan.term_secs;
        loan.state = LoanState::InRepayment;
        env.storage().persistent().set(&DataKey::Loan(borrower.clone(), loan_id), &loan);

        env.events().publish(
            (symbol_short!("drawdown"), borrower),
            (loan_id, loan.funded_amount, required_collateral),
        );
        Ok(loan)
    }

    // ========================================================================
    // Repayment
    // ========================================================================

    /// Accrues interest to now, then applies the payment interest-first.
    /// Only the applied portion is pulled from the borrower; excess beyond
    /// full payoff never leaves their balance.
    pub fn repay_loan(
        env: Env,
        borrower: Address,
        loan_id: u64,
        amount: i128,
    ) -> Result<Loan, Error> {
        Self::require_not_paused(&env)?;
        borrower.require_auth();
        if amount <= 0 { return Err(Error::InvalidParam); }

        let mut loan = Self::loan_internal(&env, &borrower, loan_id)?;
        if loan.state != LoanState::InRepayment { return Err(Error::InvalidState); }

        let now = env.ledger().timestamp();
        if now > loan.repay_deadline {
            // Past the term deadline the loan is default material, not
            // repayable. mark_defaulted persists the transition.
            return Err(Error::InvalidState);
        }

        Self::accrue(&mut loan, now)?;

        let interest_paid = amount.min(loan.accrued_interest);
        let principal_paid = (amount - interest_paid).min(loan.outstanding_principal);
        let applied = interest_paid.checked_add(principal_paid).ok_or(Error::Overflow)?;

        let escrow = Self::escrow(&env);
        Self::escrow_deposit(
            &env, &escrow, &borrower, loan_id,
            EscrowKind::Principal, &borrower, applied,
        );

        let config = Self::config(&env);
        let fee = Self::mul_div(interest_paid, config.fee_bps, BPS_DENOM)?;
        if fee > 0 {
            Self::escrow_move_to_fees(&env, &escrow, &borrower, loan_id, fee);
        }

        loan.accrued_interest -= interest_paid;
        loan.outstanding_principal -= principal_paid;
        loan.total_repaid_interest = loan.total_repaid_interest
            .checked_add(interest_paid - fee).ok_or(Error::Overflow)?;
        loan.total_repaid_principal = loan.total_repaid_principal
            .checked_add(principal_paid).ok_or(Error::Overflow)?;

        if loan.outstanding_principal == 0 && loan.accrued_interest == 0 {
            let collateral = Self::escrow_balance(
                &env, &escrow, &borrower, loan_id, EscrowKind::Collateral,
            );
            if collateral > 0 {
                Self::escrow_release(
                    &env, &escrow, &borrower, loan_id,
                    EscrowKind::Collateral, &borrower, collateral,
                );
            }
            loan.state = LoanState::Settled;
            log!(&env, "loan settled", loan_id);
            env.events().publish((symbol_short!("settle"), borrower.clone()), loan_id);
        }

        env.storage().persistent().set(&DataKey::Loan(borrower.clone(), loan_id), &loan);
        env.events().publish(
            (symbol_short!("repay"), borrower),
            (loan_id, interest_paid, principal_paid),
        );
        Ok(loan)
    }

    // ========================================================================
    // Default Resolution
    // ========================================================================

    /// Permissionless lazy-default trigger. There is no scheduler; a loan
    /// past its deadline is only recognized as defaulted when someone
    /// calls this (or trips a guard elsewhere).
    pub fn mark_defaulted(env: Env, borrower: Address, loan_id: u64) -> Result<Loan, Error> {
        Self::require_not_paused(&env)?;

        let mut loan = Self::loan_internal(&env, &borrower, loan_id)?;
        let now = env.ledger().timestamp();

        let defaulted = match loan.state {
            LoanState::Funding => {
                now > loan.funding_deadline && loan.funded_amount < loan.requested_amount
            }
            LoanState::Funded => Self::past_term_deadline(&loan, now),
            LoanState::InRepayment => now > loan.repay_deadline,
            _ => false,
        };
        if !defaulted { return Err(Error::InvalidState); }

        loan.defaulted_in_funding = loan.state == LoanState::Funding;

        let escrow = Self::escrow(&env);
        loan.escrow_at_default =
            Self::escrow_balance(&env, &escrow, &borrower, loan_id, EscrowKind::Principal);
        loan.collateral_at_default =
            Self::escrow_balance(&env, &escrow, &borrower, loan_id, EscrowKind::Collateral);
        loan.state = LoanState::Defaulted;
        env.storage().persistent().set(&DataKey::Loan(borrower.clone(), loan_id), &loan);

        log!(&env, "loan defaulted", loan_id);
        env.events().publish(
            (symbol_short!("default"), borrower),
            (loan_id, loan.escrow_at_default, loan.collateral_at_default),
        );
        Ok(loan)
    }

    /// Single-claim pro-rata payout from the balances frozen at default.
    /// A loan that lapsed before finalize has no fixed shares, so each
    /// lender simply reclaims their exact contribution. A share whose
    /// pro-rata fraction floors to zero still claims (for nothing) so the
    /// record closes.
    pub fn payout_to_lenders(
        env: Env,
        borrower: Address,
        loan_id: u64,
        lender: Address,
    ) -> Result<i128, Error> {
        Self::require_not_paused(&env)?;
        lender.require_auth();

        let loan = Self::loan_internal(&env, &borrower, loan_id)?;
        if loan.state != LoanState::Defaulted { return Err(Error::InvalidState); }

        let share_key = DataKey::Share(borrower.clone(), loan_id, lender.clone());
        let mut share: LenderShare = env.storage().persistent().get(&share_key)
            .ok_or(Error::ShareNotFound)?;
        if share.claimed { return Err(Error::AlreadyClaimed); }

        let escrow = Self::escrow(&env);
        let total = if loan.defaulted_in_funding {
            Self::escrow_release(
                &env, &escrow, &borrower, loan_id,
                EscrowKind::Principal, &lender, share.principal,
            );
            share.principal
        } else {
            let from_escrow =
                Self::mul_div(loan.escrow_at_default, share.pro_rata_bps, BPS_DENOM)?;
            let from_collateral =
                Self::mul_div(loan.collateral_at_default, share.pro_rata_bps, BPS_DENOM)?;
            if from_escrow > 0 {
                Self::escrow_release(
                    &env, &escrow, &borrower, loan_id,
                    EscrowKind::Principal, &lender, from_escrow,
                );
            }
            if from_collateral > 0 {
                Self::escrow_release(
                    &env, &escrow, &borrower, loan_id,
                    EscrowKind::Collateral, &lender, from_collateral,
                );
            }
            from_escrow.checked_add(from_collateral).ok_or(Error::Overflow)?
        };

        share.claimed = true;
        env.storage().persistent().set(&share_key, &share);

        env.events().publish((symbol_short!("payout"), lender), (borrower, loan_id, total));
        Ok(total)
    }

    /// Settlement-side counterpart of the default payout: once a loan is
    /// `Settled`, each lender claims their pro-rata slice of the repaid
    /// principal and net interest, exactly once.
    pub fn claim_repayment(
        env: Env,
        borrower: Address,
        loan_id: u64,
        lender: Address,
    ) -> Result<i128, Error> {
        Self::require_not_paused(&env)?;
        lender.require_auth();

        let loan = Self::loan_internal(&env, &borrower, loan_id)?;
        if loan.state != LoanState::Settled { return Err(Error::InvalidState); }

        let share_key = DataKey::Share(borrower.clone(), loan_id, lender.clone());
        let mut share: LenderShare = env.storage().persistent().get(&share_key)
            .ok_or(Error::ShareNotFound)?;
        if share.claimed { return Err(Error::AlreadyClaimed); }

        let repaid = loan.total_repaid_principal
            .checked_add(loan.total_repaid_interest).ok_or(Error::Overflow)?;
        let amount = Self::mul_div(repaid, share.pro_rata_bps, BPS_DENOM)?;
        if amount > 0 {
            let escrow = Self::escrow(&env);
            Self::escrow_release(
                &env, &escrow, &borrower, loan_id,
                EscrowKind::Principal, &lender, amount,
            );
        }

        share.claimed = true;
        env.storage().persistent().set(&share_key, &share);

        env.events().publish((symbol_short!("claim"), lender), (borrower, loan_id, amount));
        Ok(amount)
    }

    // ========================================================================
    // Admin
    // ========================================================================

    pub fn collect_fees(env: Env, destination: Address, amount: i128) -> Result<(), Error> {
        let config = Self::config(&env);
        config.admin.require_auth();
        let escrow = Self::escrow(&env);
        let _: () = env.invoke_contract(
            &escrow,
            &Symbol::new(&env, "withdraw_fees"),
            soroban_sdk::vec![&env, destination.into_val(&env), amount.into_val(&env)],
        );
        Ok(())
    }

    pub fn pause(env: Env) -> Result<(), Error> {
        let config = Self::config(&env);
        config.admin.require_auth();
        env.storage().instance().set(&DataKey::Paused, &true);
        Ok(())
    }

    pub fn unpause(env: Env) -> Result<(), Error> {
        let config = Self::config(&env);
        config.admin.require_auth();
        env.storage().instance().set(&DataKey::Paused, &false);
        Ok(())
    }

    // ========================================================================
    // View
    // ========================================================================

    pub fn get_loan(env: Env, borrower: Address, loan_id: u64) -> Result<Loan, Error> {
        Self::loan_internal(&env, &borrower, loan_id)
    }

    pub fn get_share(
        env: Env,
        borrower: Address,
        loan_id: u64,
        lender: Address,
    ) -> Result<LenderShare, Error> {
        env.storage().persistent()
            .get(&DataKey::Share(borrower, loan_id, lender))
            .ok_or(Error::ShareNotFound)
    }

    pub fn get_lenders(env: Env, borrower: Address, loan_id: u64) -> Vec<Address> {
        env.storage().persistent()
            .get(&DataKey::Lenders(borrower, loan_id))
            .unwrap_or(Vec::new(&env))
    }

    pub fn get_config(env: Env) -> Config {
        Self::config(&env)
    }

    /// Principal plus interest accrued to now, without mutating the loan.
    pub fn current_obligation(env: Env, borrower: Address, loan_id: u64) -> Result<i128, Error> {
        let loan = Self::loan_internal(&env, &borrower, loan_id)?;
        let mut interest = loan.accrued_interest;
        if loan.state == LoanState::InRepayment {
            let now = env.ledger().timestamp();
            let elapsed = now.saturating_sub(loan.last_accrual_ts);
            if elapsed > 0 {
                let pending = Self::simple_interest(
                    loan.outstanding_principal, loan.actual_apr_bps, elapsed,
                )?;
                interest = interest.checked_add(pending).ok_or(Error::Overflow)?;
            }
        }
        loan.outstanding_principal.checked_add(interest).ok_or(Error::Overflow)
    }

    pub fn total_loans(env: Env) -> u64 {
        env.storage().instance().get(&DataKey::TotalLoans).unwrap_or(0)
    }

    // ========================================================================
    // Internal
    // ========================================================================

    fn config(env: &Env) -> Config {
        env.storage().instance().get(&DataKey::Config).unwrap()
    }

    fn escrow(env: &Env) -> Address {
        env.storage().instance().get(&DataKey::Escrow).unwrap()
    }

    fn loan_internal(env: &Env, borrower: &Address, loan_id: u64) -> Result<Loan, Error> {
        env.storage().persistent()
            .get(&DataKey::Loan(borrower.clone(), loan_id))
            .ok_or(Error::LoanNotFound)
    }

    fn require_not_paused(env: &Env) -> Result<(), Error> {
        let paused: bool = env.storage().instance().get(&DataKey::Paused).unwrap_or(false);
        if paused { Err(Error::ContractPaused) } else { Ok(()) }
    }

    // A finalized loan the borrower never draws still expires: its term is
    // measured from the funding deadline.
    fn past_term_deadline(loan: &Loan, now: u64) -> bool {
        now > loan.funding_deadline.saturating_add(loan.term_secs)
    }

    fn accrue(loan: &mut Loan, now: u64) -> Result<(), Error> {
        let elapsed = now.saturating_sub(loan.last_accrual_ts);
        if elapsed == 0 { return Ok(()); }
        let interest = Self::simple_interest(
            loan.outstanding_principal, loan.actual_apr_bps, elapsed,
        )?;
        loan.accrued_interest = loan.accrued_interest
            .checked_add(interest).ok_or(Error::Overflow)?;
        loan.last_accrual_ts = now;
        Ok(())
    }

    // principal * rate_bps * elapsed / (YEAR * 10000)
    fn simple_interest(principal: i128, rate_bps: i128, elapsed: u64) -> Result<i128, Error> {
        let num = (principal as u128)
            .checked_mul(rate_bps as u128).ok_or(Error::Overflow)?
            .checked_mul(elapsed as u128).ok_or(Error::Overflow)?;
        let den = (SECONDS_PER_YEAR as u128) * (BPS_DENOM as u128);
        Ok((num / den) as i128)
    }

    fn mul_div(a: i128, b: i128, c: i128) -> Result<i128, Error> {
        if c == 0 { return Err(Error::Overflow); }
        Ok(((a as u128).checked_mul(b as u128).ok_or(Error::Overflow)?
            .checked_div(c as u128).ok_or(Error::Overflow)?) as i128)
    }

    // ------------------------------------------------------------------------
    // Escrow vault calls. A failure in the vault traps the whole invocation,
    // which is what keeps balance movements and ledger mutations atomic.
    // ------------------------------------------------------------------------

    fn escrow_deposit(
        env: &Env,
        escrow: &Address,
        borrower: &Address,
        loan_id: u64,
        kind: EscrowKind,
        from: &Address,
        amount: i128,
    ) {
        let _: i128 = env.invoke_contract(
            escrow,
            &Symbol::new(env, "deposit"),
            soroban_sdk::vec![
                env,
                borrower.clone().into_val(env),
                loan_id.into_val(env),
                kind.into_val(env),
                from.clone().into_val(env),
                amount.into_val(env),
            ],
        );
    }

    fn escrow_release(
        env: &Env,
        escrow: &Address,
        borrower: &Address,
        loan_id: u64,
        kind: EscrowKind,
        destination: &Address,
        amount: i128,
    ) {
        let _: i128 = env.invoke_contract(
            escrow,
            &Symbol::new(env, "release"),
            soroban_sdk::vec![
                env,
                borrower.clone().into_val(env),
                loan_id.into_val(env),
                kind.into_val(env),
                destination.clone().into_val(env),
                amount.into_val(env),
            ],
        );
    }

    fn escrow_move_to_fees(
        env: &Env,
        escrow: &Address,
        borrower: &Address,
        loan_id: u64,
        amount: i128,
    ) {
        let _: () = env.invoke_contract(
            escrow,
            &Symbol::new(env, "move_to_fees"),
            soroban_sdk::vec![
                env,
                borrower.clone().into_val(env),
                loan_id.into_val(env),
                amount.into_val(env),
            ],
        );
    }

    fn escrow_balance(
        env: &Env,
        escrow: &Address,
        borrower: &Address,
        loan_id: u64,
        kind: EscrowKind,
    ) -> i128 {
        env.invoke_contract(
            escrow,
            &Symbol::new(env, "balance"),
            soroban_sdk::vec![
                env,
                borrower.clone().into_val(env),
                loan_id.into_val(env),
                kind.into_val(env),
            ],
        )
    }
}
