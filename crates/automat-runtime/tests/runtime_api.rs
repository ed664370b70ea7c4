//! Builder validation, publication entrypoints, the context slot, and the
//! typed query API.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;

use automat_kernel::PropertiesFactory;
use automat_machine::{
    ApplyContext, Behaviour, BehaviourRegistry, Emission, Machine, MachineError,
};
use automat_runtime::{context, Combine, RangeQuery, Runtime, RuntimeError};
use automat_types::{Codec, EntityClass, Event, EventClass, Signal, CREATE_EVENT};

//─────────────────────────────
//  Account fixture
//─────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Account {
    owner: String,
    balance: i64,
}

impl EntityClass for Account {
    const NAME: &'static str = "account";
}

#[derive(Debug, Serialize, Deserialize)]
struct Open {
    owner: String,
    balance: i64,
}

impl EventClass for Open {
    const NAME: &'static str = "account.open";
}

struct AccountMachine {
    id: String,
    account: Option<Account>,
}

impl Machine for AccountMachine {
    fn class(&self) -> &str {
        Account::NAME
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn state(&self) -> String {
        if self.account.is_some() { "Open".to_string() } else { "New".to_string() }
    }

    fn apply(&mut self, event: &Event, _ctx: &ApplyContext) -> Result<(), MachineError> {
        match event.class.as_str() {
            CREATE_EVENT => Ok(()),
            "account.open" => {
                let open: Open = event.decode(Codec::Json)?;
                self.account = Some(Account { owner: open.owner, balance: open.balance });
                Ok(())
            }
            other => Err(MachineError::Rejected(format!("unexpected event {other}"))),
        }
    }

    fn snapshot(&self) -> Result<Option<Vec<u8>>, MachineError> {
        match &self.account {
            Some(account) => Ok(Some(Codec::Json.to_bytes(account)?)),
            None => Ok(None),
        }
    }

    fn drain_self(&mut self) -> Vec<Event> {
        Vec::new()
    }

    fn drain_outbound(&mut self) -> Vec<Emission> {
        Vec::new()
    }
}

struct AccountBehaviour;

impl Behaviour for AccountBehaviour {
    fn create(&self, id: &str) -> Box<dyn Machine> {
        Box::new(AccountMachine { id: id.to_string(), account: None })
    }

    fn rehydrate(
        &self,
        id: &str,
        snapshot: &[u8],
        state: &str,
    ) -> Result<Box<dyn Machine>, MachineError> {
        if state != "Open" {
            return Err(MachineError::UnknownState {
                class: Account::NAME.to_string(),
                state: state.to_string(),
            });
        }
        Ok(Box::new(AccountMachine {
            id: id.to_string(),
            account: Some(Codec::Json.from_bytes(snapshot)?),
        }))
    }
}

/// Projects owner and balance into the property index.
struct AccountProperties;

impl PropertiesFactory for AccountProperties {
    fn properties(
        &self,
        _class: &str,
        _id: &str,
        entity: &[u8],
    ) -> anyhow::Result<BTreeMap<String, String>> {
        let account: Account = Codec::Json.from_bytes(entity)?;
        let mut map = BTreeMap::new();
        map.insert("owner".to_string(), account.owner);
        map.insert("balance".to_string(), account.balance.to_string());
        Ok(map)
    }
}

async fn account_runtime() -> Runtime {
    let behaviours = BehaviourRegistry::new().with(Account::NAME, Arc::new(AccountBehaviour));
    let runtime = Runtime::builder()
        .in_memory()
        .behaviours(behaviours)
        .properties_factory(Arc::new(AccountProperties))
        .retry_interval(Duration::from_millis(50))
        .build()
        .await
        .unwrap();
    runtime.create_schema().await.unwrap();
    runtime
}

async fn open_accounts(runtime: &Runtime, accounts: &[(&str, &str, i64)]) {
    for (id, owner, balance) in accounts {
        runtime
            .signal(Account::NAME, id, &Open { owner: owner.to_string(), balance: *balance })
            .await
            .unwrap();
    }
    for _ in 0..200 {
        if runtime.list_all::<Account>().await.unwrap().len() == accounts.len() {
            return;
        }
        sleep(Duration::from_millis(25)).await;
    }
    panic!("accounts were never opened");
}

//─────────────────────────────
//  Builder and entrypoints
//─────────────────────────────

#[tokio::test]
async fn build_requires_behaviours() {
    let err = Runtime::builder().in_memory().build().await.unwrap_err();
    assert!(matches!(err, RuntimeError::Configuration(_)));
}

#[tokio::test]
async fn build_requires_a_connection_factory() {
    let err = Runtime::builder().behaviours(BehaviourRegistry::new()).build().await.unwrap_err();
    assert!(matches!(err, RuntimeError::Configuration(_)));
}

#[tokio::test]
async fn delayed_publication_is_rejected() {
    let runtime = account_runtime().await;

    let err = runtime
        .send(Signal::delayed(Account::NAME, "a1", Event::create(), 1_000))
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Unsupported(_)));

    runtime.shutdown().await;
}

#[tokio::test]
async fn invalid_signals_are_rejected() {
    let runtime = account_runtime().await;

    let err = runtime
        .send(Signal::immediate(Account::NAME, "", Event::create()))
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::InvalidSignal(_)));

    runtime.shutdown().await;
}

//─────────────────────────────
//  Context slot
//─────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct Probe {
    in_context: bool,
}

impl EntityClass for Probe {
    const NAME: &'static str = "probe";
}

struct ProbeMachine {
    id: String,
    probe: Option<Probe>,
}

impl Machine for ProbeMachine {
    fn class(&self) -> &str {
        Probe::NAME
    }
    fn id(&self) -> &str {
        &self.id
    }
    fn state(&self) -> String {
        "Checked".to_string()
    }

    fn apply(&mut self, event: &Event, _ctx: &ApplyContext) -> Result<(), MachineError> {
        if event.class == "probe.check" {
            self.probe = Some(Probe { in_context: context::current().is_ok() });
        }
        Ok(())
    }

    fn snapshot(&self) -> Result<Option<Vec<u8>>, MachineError> {
        match &self.probe {
            Some(probe) => Ok(Some(Codec::Json.to_bytes(probe)?)),
            None => Ok(None),
        }
    }

    fn drain_self(&mut self) -> Vec<Event> {
        Vec::new()
    }
    fn drain_outbound(&mut self) -> Vec<Emission> {
        Vec::new()
    }
}

struct ProbeBehaviour;

impl Behaviour for ProbeBehaviour {
    fn create(&self, id: &str) -> Box<dyn Machine> {
        Box::new(ProbeMachine { id: id.to_string(), probe: None })
    }
    fn rehydrate(
        &self,
        id: &str,
        snapshot: &[u8],
        _state: &str,
    ) -> Result<Box<dyn Machine>, MachineError> {
        Ok(Box::new(ProbeMachine {
            id: id.to_string(),
            probe: Some(Codec::Json.from_bytes(snapshot)?),
        }))
    }
}

#[tokio::test]
async fn persistence_context_is_scoped_to_the_apply() {
    // Outside an apply cycle the slot is empty.
    assert!(context::current().is_err());

    let behaviours = BehaviourRegistry::new().with(Probe::NAME, Arc::new(ProbeBehaviour));
    let runtime = Runtime::builder().in_memory().behaviours(behaviours).build().await.unwrap();
    runtime.create_schema().await.unwrap();

    runtime.signal_raw(Probe::NAME, "p1", Event::new("probe.check", Vec::new())).await.unwrap();

    let mut observed = None;
    for _ in 0..200 {
        if let Some(probe) = runtime.get::<Probe>("p1").await.unwrap() {
            observed = Some(probe);
            break;
        }
        sleep(Duration::from_millis(25)).await;
    }
    assert!(observed.expect("probe never ran").in_context);

    runtime.shutdown().await;
}

//─────────────────────────────
//  Query API
//─────────────────────────────

#[tokio::test]
async fn typed_lookups_by_id_and_class() {
    let runtime = account_runtime().await;
    open_accounts(&runtime, &[("a1", "alice", 10), ("a2", "alice", 25), ("a3", "bob", 40)])
        .await;

    let account = runtime.get::<Account>("a1").await.unwrap().unwrap();
    assert_eq!(account, Account { owner: "alice".to_string(), balance: 10 });

    let (_, state) = runtime.get_with_state::<Account>("a2").await.unwrap().unwrap();
    assert_eq!(state, "Open");

    assert!(runtime.get::<Account>("ghost").await.unwrap().is_none());

    let all = runtime.list_all::<Account>().await.unwrap();
    let ids: Vec<_> = all.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec!["a1", "a2", "a3"]);

    runtime.shutdown().await;
}

#[tokio::test]
async fn lookups_by_property() {
    let runtime = account_runtime().await;
    open_accounts(
        &runtime,
        &[("a1", "alice", 10), ("a2", "alice", 25), ("a3", "bob", 40), ("a4", "alice", 40)],
    )
    .await;

    let alices = runtime.get_by_property::<Account>("owner", "alice").await.unwrap();
    let ids: Vec<_> = alices.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec!["a1", "a2", "a4"]);

    let mut constraints = BTreeMap::new();
    constraints.insert("owner".to_string(), "alice".to_string());
    constraints.insert("balance".to_string(), "40".to_string());

    let both = runtime.get_by_properties::<Account>(&constraints, Combine::And).await.unwrap();
    let ids: Vec<_> = both.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec!["a4"]);

    let either = runtime.get_by_properties::<Account>(&constraints, Combine::Or).await.unwrap();
    let ids: Vec<_> = either.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec!["a1", "a2", "a3", "a4"]);

    let none = runtime
        .get_by_properties::<Account>(&BTreeMap::new(), Combine::And)
        .await
        .unwrap();
    assert!(none.is_empty());

    runtime.shutdown().await;
}

#[tokio::test]
async fn ranged_lookup_paginates_deterministically() {
    let runtime = account_runtime().await;
    open_accounts(
        &runtime,
        &[("a1", "alice", 10), ("a2", "alice", 25), ("a3", "bob", 40), ("a4", "alice", 40)],
    )
    .await;

    // Balance in [10, 40): alice's a1 and a2; a4 is excluded by the open
    // upper bound and a3 by the owner constraint.
    let page = |last_id: Option<&'static str>| RangeQuery {
        name: "owner",
        value: "alice",
        range_name: "balance",
        start: 10,
        start_inclusive: true,
        end: 40,
        end_inclusive: false,
        limit: 1,
        last_id,
    };

    let first = runtime.get_by_property_range::<Account>(page(None)).await.unwrap();
    let ids: Vec<_> = first.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec!["a1"]);

    let second = runtime.get_by_property_range::<Account>(page(Some("a1"))).await.unwrap();
    let ids: Vec<_> = second.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec!["a2"]);

    let third = runtime.get_by_property_range::<Account>(page(Some("a2"))).await.unwrap();
    assert!(third.is_empty());

    runtime.shutdown().await;
}
