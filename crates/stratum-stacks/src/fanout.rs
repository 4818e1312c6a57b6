//! Federation fan-out node.
//!
//! Owns three named child groups rather than a single child: the
//! unconditional group, the server group, and a variable-length ordered
//! clients group. Operations delegate to every group member and aggregate
//! the per-child values. The declared order (unconditional, server, then
//! clients by index) is preserved everywhere, because client indices are
//! how clients are addressed elsewhere in the system.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;

use stratum_core::{
    ChildSlot, Material, Materialized, NamedElement, ObjectId, Selector, Stage, StageRef,
    StageValue, StratumError, StratumResult, TypeSignature, ValueRef,
};

pub struct FanOutStage {
    id: ObjectId,
    unconditional: Vec<ChildSlot>,
    server: Vec<ChildSlot>,
    clients: Vec<ChildSlot>,
}

impl FanOutStage {
    pub fn new(
        unconditional: Vec<StageRef>,
        server: Vec<StageRef>,
        clients: Vec<StageRef>,
    ) -> Arc<Self> {
        let slots = |stages: Vec<StageRef>| stages.into_iter().map(ChildSlot::new).collect();
        Arc::new(Self {
            id: ObjectId::next(),
            unconditional: slots(unconditional),
            server: slots(server),
            clients: slots(clients),
        })
    }

    /// All child edges in declared order.
    pub(crate) fn child_slots(&self) -> Vec<ChildSlot> {
        self.unconditional
            .iter()
            .chain(self.server.iter())
            .chain(self.clients.iter())
            .cloned()
            .collect()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    fn unwrap_own<'a>(&self, value: &'a ValueRef) -> StratumResult<&'a FanOutValue> {
        value.as_any().downcast_ref::<FanOutValue>().ok_or_else(|| {
            StratumError::Type(format!(
                "fan-out stage {} received a value it does not own",
                self.id
            ))
        })
    }
}

/// Aggregate of one value per fan-out child, grouped the way the stage
/// groups its children.
pub struct FanOutValue {
    unconditional: Vec<ValueRef>,
    server: Vec<ValueRef>,
    clients: Vec<ValueRef>,
    signature: TypeSignature,
}

impl FanOutValue {
    fn new(
        unconditional: Vec<ValueRef>,
        server: Vec<ValueRef>,
        clients: Vec<ValueRef>,
    ) -> Arc<Self> {
        let member = unconditional
            .first()
            .or_else(|| server.first())
            .or_else(|| clients.first())
            .map(|v| v.type_signature())
            .unwrap_or_else(TypeSignature::unknown);
        Arc::new(Self {
            unconditional,
            server,
            clients,
            signature: TypeSignature::federated(&member),
        })
    }

    pub fn client_values(&self) -> &[ValueRef] {
        &self.clients
    }
}

#[async_trait]
impl StageValue for FanOutValue {
    fn type_signature(&self) -> TypeSignature {
        self.signature.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn compute(&self) -> StratumResult<Materialized> {
        let mut groups = serde_json::Map::new();
        for (name, values) in [
            ("unconditional", &self.unconditional),
            ("server", &self.server),
            ("clients", &self.clients),
        ] {
            let mut payloads = Vec::with_capacity(values.len());
            for value in values {
                payloads.push(value.compute().await?.payload);
            }
            groups.insert(name.to_string(), serde_json::Value::Array(payloads));
        }
        Ok(Materialized::new(
            serde_json::Value::Object(groups),
            self.signature.clone(),
        ))
    }
}

#[async_trait]
impl Stage for FanOutStage {
    fn kind(&self) -> &'static str {
        "FanOutStage"
    }

    fn id(&self) -> ObjectId {
        self.id
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn ingest(
        &self,
        material: Material,
        type_spec: Option<TypeSignature>,
    ) -> StratumResult<ValueRef> {
        let mut groups: Vec<Vec<ValueRef>> = Vec::with_capacity(3);
        for slots in [&self.unconditional, &self.server, &self.clients] {
            let mut values = Vec::with_capacity(slots.len());
            for slot in slots.iter() {
                values.push(
                    slot.get()
                        .ingest(material.clone(), type_spec.clone())
                        .await?,
                );
            }
            groups.push(values);
        }
        let mut groups = groups.into_iter();
        let (unconditional, server, clients) = (
            groups.next().unwrap_or_default(),
            groups.next().unwrap_or_default(),
            groups.next().unwrap_or_default(),
        );
        Ok(FanOutValue::new(unconditional, server, clients) as ValueRef)
    }

    async fn invoke(&self, comp: ValueRef, arg: Option<ValueRef>) -> StratumResult<ValueRef> {
        let comp = self.unwrap_own(&comp)?;
        let arg = match &arg {
            Some(value) => Some(self.unwrap_own(value)?),
            None => None,
        };
        let mut groups: Vec<Vec<ValueRef>> = Vec::with_capacity(3);
        for (slots, comps, args) in [
            (
                &self.unconditional,
                &comp.unconditional,
                arg.map(|a| &a.unconditional),
            ),
            (&self.server, &comp.server, arg.map(|a| &a.server)),
            (&self.clients, &comp.clients, arg.map(|a| &a.clients)),
        ] {
            if slots.len() != comps.len() {
                return Err(StratumError::Type(
                    "fan-out computation arity does not match the child groups".to_string(),
                ));
            }
            if let Some(args) = args {
                if args.len() != slots.len() {
                    return Err(StratumError::Type(
                        "fan-out argument arity does not match the child groups".to_string(),
                    ));
                }
            }
            let mut values = Vec::with_capacity(slots.len());
            for (index, slot) in slots.iter().enumerate() {
                let child_arg = args.map(|a| a[index].clone());
                values.push(slot.get().invoke(comps[index].clone(), child_arg).await?);
            }
            groups.push(values);
        }
        let mut groups = groups.into_iter();
        let (unconditional, server, clients) = (
            groups.next().unwrap_or_default(),
            groups.next().unwrap_or_default(),
            groups.next().unwrap_or_default(),
        );
        Ok(FanOutValue::new(unconditional, server, clients) as ValueRef)
    }

    async fn combine(&self, elements: Vec<NamedElement>) -> StratumResult<ValueRef> {
        let mut constituents = Vec::with_capacity(elements.len());
        for element in &elements {
            constituents.push((element.name.clone(), self.unwrap_own(&element.value)?));
        }
        let picks: [fn(&FanOutValue) -> &Vec<ValueRef>; 3] = [
            |f| &f.unconditional,
            |f| &f.server,
            |f| &f.clients,
        ];
        let mut groups: Vec<Vec<ValueRef>> = Vec::with_capacity(3);
        for (slots, pick) in [&self.unconditional, &self.server, &self.clients]
            .into_iter()
            .zip(picks)
        {
            let mut values = Vec::with_capacity(slots.len());
            for (index, slot) in slots.iter().enumerate() {
                let mut child_elements = Vec::with_capacity(constituents.len());
                for (name, fan) in &constituents {
                    let value = pick(fan).get(index).cloned().ok_or_else(|| {
                        StratumError::Type(
                            "fan-out element arity does not match the child groups".to_string(),
                        )
                    })?;
                    child_elements.push(NamedElement {
                        name: name.clone(),
                        value,
                    });
                }
                values.push(slot.get().combine(child_elements).await?);
            }
            groups.push(values);
        }
        let mut groups = groups.into_iter();
        let (unconditional, server, clients) = (
            groups.next().unwrap_or_default(),
            groups.next().unwrap_or_default(),
            groups.next().unwrap_or_default(),
        );
        Ok(FanOutValue::new(unconditional, server, clients) as ValueRef)
    }

    async fn project(&self, source: ValueRef, selector: Selector) -> StratumResult<ValueRef> {
        let source = self.unwrap_own(&source)?;
        let mut groups: Vec<Vec<ValueRef>> = Vec::with_capacity(3);
        for (slots, values) in [
            (&self.unconditional, &source.unconditional),
            (&self.server, &source.server),
            (&self.clients, &source.clients),
        ] {
            if slots.len() != values.len() {
                return Err(StratumError::Type(
                    "fan-out source arity does not match the child groups".to_string(),
                ));
            }
            let mut projected = Vec::with_capacity(slots.len());
            for (index, slot) in slots.iter().enumerate() {
                projected.push(
                    slot.get()
                        .project(values[index].clone(), selector.clone())
                        .await?,
                );
            }
            groups.push(projected);
        }
        let mut groups = groups.into_iter();
        let (unconditional, server, clients) = (
            groups.next().unwrap_or_default(),
            groups.next().unwrap_or_default(),
            groups.next().unwrap_or_default(),
        );
        Ok(FanOutValue::new(unconditional, server, clients) as ValueRef)
    }

    fn close(&self) {
        for slot in self.child_slots() {
            slot.get().close();
        }
    }
}
