//! Geofenced check-in: eligibility gate, minting and collection queries.

use std::sync::{Arc, Mutex};

use rustc_hash::FxHashSet;
use tracing::{error, info, warn};

use crate::catalog;
use crate::error::{FlowError, TxOutcome};
use crate::execution::{ContractCall, StepLabel, SubmittedTx, TxPipeline};
use crate::geo::{distance_meters, within_radius};
use crate::ledger::ScValue;
use crate::location::LocationState;
use crate::types::{to_micro_degrees, CheckinRecord, Place};
use crate::wallet::WalletSession;

const MINT: StepLabel = StepLabel::new("checkin", "mint");

/// Whether `location` is inside the geofence of `place`.
///
/// Pure: returns the measured distance on success and never touches the
/// network.
pub fn check_eligibility(place: &Place, location: &LocationState, default_radius_m: f64) -> Result<f64, FlowError> {
    let here = match location {
        LocationState::Available(c) => *c,
        LocationState::Acquiring => {
            return Err(FlowError::LocationUnavailable("Still acquiring location".to_string()))
        }
        LocationState::Unavailable(reason) => return Err(FlowError::LocationUnavailable(reason.clone())),
    };

    let radius_m = place.radius_or(default_radius_m);
    let distance_m = distance_meters(here, place.location);
    if within_radius(here, place.location, radius_m) {
        Ok(distance_m)
    } else {
        Err(FlowError::OutOfRange {
            place_id: place.id,
            distance_m,
            radius_m,
        })
    }
}

/// Decode one `CheckinNFT` struct returned by `get_user_nfts`
pub fn decode_checkin_record(value: &ScValue) -> Result<CheckinRecord, FlowError> {
    let field = |name: &str| {
        value
            .field(name)
            .ok_or_else(|| FlowError::Decode(format!("check-in record is missing '{}'", name)))
    };
    let bad = |name: &str| FlowError::Decode(format!("check-in record field '{}' has the wrong type", name));

    Ok(CheckinRecord {
        token_id: field("token_id")?.as_u64().ok_or_else(|| bad("token_id"))?,
        place_id: field("place_id")?.as_u32().ok_or_else(|| bad("place_id"))?,
        place_name: field("place_name")?.as_str().ok_or_else(|| bad("place_name"))?.to_string(),
        latitude: field("latitude")?.as_i64().ok_or_else(|| bad("latitude"))?,
        longitude: field("longitude")?.as_i64().ok_or_else(|| bad("longitude"))?,
        check_in_timestamp: field("check_in_timestamp")?
            .as_u64()
            .ok_or_else(|| bad("check_in_timestamp"))?,
        owner: field("owner")?.as_str().ok_or_else(|| bad("owner"))?.to_string(),
        image_url: field("image_url")?.as_str().ok_or_else(|| bad("image_url"))?.to_string(),
    })
}

/// Releases the in-flight slot for a place when dropped
struct InFlightGuard<'a> {
    set: &'a Mutex<FxHashSet<u32>>,
    place_id: u32,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut set = self.set.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.place_id);
    }
}

/// Check-in orchestrator
pub struct CheckinService {
    pipeline: Arc<TxPipeline>,
    contract: String,
    default_radius_m: f64,
    in_flight: Mutex<FxHashSet<u32>>,
}

impl CheckinService {
    pub fn new(pipeline: Arc<TxPipeline>, contract: &str, default_radius_m: f64) -> Self {
        Self {
            pipeline,
            contract: contract.to_string(),
            default_radius_m,
            in_flight: Mutex::new(FxHashSet::default()),
        }
    }

    fn contract(&self) -> Result<&str, FlowError> {
        if self.contract.is_empty() {
            Err(FlowError::NotConfigured("Check-in NFT"))
        } else {
            Ok(&self.contract)
        }
    }

    fn claim(&self, place_id: u32) -> Result<InFlightGuard<'_>, FlowError> {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(place_id) {
            return Err(FlowError::CheckinInFlight(place_id));
        }
        Ok(InFlightGuard {
            set: &self.in_flight,
            place_id,
        })
    }

    /// Eligibility for a registered place
    pub fn eligibility(&self, place_id: u32, location: &LocationState) -> Result<f64, FlowError> {
        let place = catalog::place(place_id).ok_or(FlowError::UnknownPlace(place_id))?;
        check_eligibility(place, location, self.default_radius_m)
    }

    /// Mint the commemorative token for `place_id` if the user is in range
    pub async fn try_check_in(
        &self,
        session: &WalletSession,
        place_id: u32,
        location: &LocationState,
    ) -> Result<SubmittedTx, FlowError> {
        let place = catalog::place(place_id).ok_or(FlowError::UnknownPlace(place_id))?;
        let distance_m = check_eligibility(place, location, self.default_radius_m)?;
        let signer = session.signer()?;
        let contract = self.contract()?;
        let _guard = self.claim(place_id)?;
        if self.has_checked_in(signer.address(), place_id).await? {
            return Err(FlowError::AlreadyCheckedIn(place_id));
        }

        info!(
            "[CHECKIN] {} at '{}' ({:.0} m from center)",
            signer.address(),
            place.name,
            distance_m
        );

        let call = ContractCall::new(
            contract,
            "mint",
            vec![
                ScValue::address(signer.address()),
                ScValue::U32(place.id),
                ScValue::string(place.name),
                ScValue::I64(to_micro_degrees(place.location.lat)),
                ScValue::I64(to_micro_degrees(place.location.lng)),
                ScValue::string(place.image),
            ],
        );
        self.pipeline.invoke(&signer, &call, MINT).await
    }

    /// Boundary form of [`try_check_in`](Self::try_check_in); never fails
    pub async fn check_in(&self, session: &WalletSession, place_id: u32, location: &LocationState) -> TxOutcome {
        match self.try_check_in(session, place_id, location).await {
            Ok(tx) => {
                info!("[CHECKIN] ✅ Check-in submitted for place {}: {}", place_id, tx.hash);
                TxOutcome::ok(vec![tx.hash])
            }
            Err(e) => {
                if e.is_local() {
                    warn!("[CHECKIN] Check-in refused: {}", e);
                } else {
                    error!("[CHECKIN] ❌ Check-in failed: {}", e);
                }
                TxOutcome::failed(&e)
            }
        }
    }

    /// Whether `address` already holds the token for `place_id`
    pub async fn has_checked_in(&self, address: &str, place_id: u32) -> Result<bool, FlowError> {
        let call = ContractCall::new(
            self.contract()?,
            "has_checked_in",
            vec![ScValue::address(address), ScValue::U32(place_id)],
        );
        match self.pipeline.read(address, &call).await? {
            ScValue::Void => Ok(false),
            value => value
                .as_bool()
                .ok_or_else(|| FlowError::Decode(format!("has_checked_in returned {:?}", value))),
        }
    }

    /// Every check-in token owned by `address`
    pub async fn user_nfts(&self, address: &str) -> Result<Vec<CheckinRecord>, FlowError> {
        let call = ContractCall::new(self.contract()?, "get_user_nfts", vec![ScValue::address(address)]);
        let value = self.pipeline.read(address, &call).await?;
        let items = match &value {
            ScValue::Void => return Ok(Vec::new()),
            ScValue::Vec(items) => items,
            other => return Err(FlowError::Decode(format!("get_user_nfts returned {:?}", other))),
        };
        items.iter().map(decode_checkin_record).collect()
    }
}
