//! Collaborator trait implementations for [`SimCloud`].
//!
//! Every call sleeps for the configured latency, is counted (and
//! journaled if it mutates), and then consults the fault toggles before
//! touching the store.

use fleet_core::{
    BackendAddress, BackendSet, BackendSetSpec, LaunchRequest, LoadBalancerApi, ProviderError,
    ProviderFuture, ProviderResult, ProvisioningApi, Worker, WorkerFilter, WorkerId,
};
use tracing::trace;

use crate::faults::SimCall;
use crate::store::SimCloud;

impl SimCloud {
    async fn latency(&self) {
        let latency = self.timing().call_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn provisioning_gate(&self, op: &str) -> ProviderResult<()> {
        if self.faults().provisioning_down() {
            trace!(op, "provisioning outage injected");
            return Err(ProviderError::Unavailable(format!("provisioning api down ({op})")));
        }
        Ok(())
    }

    fn load_balancer_gate(&self, op: &str) -> ProviderResult<()> {
        if self.faults().load_balancer_down() {
            trace!(op, "load balancer outage injected");
            return Err(ProviderError::Unavailable(format!("load balancer api down ({op})")));
        }
        Ok(())
    }
}

impl ProvisioningApi for SimCloud {
    fn create<'a>(&'a self, request: &'a LaunchRequest) -> ProviderFuture<'a, WorkerId> {
        Box::pin(async move {
            self.latency().await;
            self.faults().count_create();
            self.faults().record(SimCall::Create {
                display_name: request.display_name.clone(),
            });
            self.provisioning_gate("create")?;
            if self.faults().fail_create() {
                return Err(ProviderError::Rejected(format!(
                    "out of host capacity for {}",
                    request.spec.shape
                )));
            }
            Ok(self.create_worker(request)?)
        })
    }

    fn delete<'a>(&'a self, id: &'a str) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            self.latency().await;
            self.faults().count_delete();
            self.faults().record(SimCall::Delete { id: id.to_string() });
            self.provisioning_gate("delete")?;
            if self.faults().fail_delete() {
                return Err(ProviderError::Unavailable(format!("delete of {id} failed")));
            }
            Ok(self.delete_worker(id)?)
        })
    }

    fn get<'a>(&'a self, id: &'a str) -> ProviderFuture<'a, Worker> {
        Box::pin(async move {
            self.latency().await;
            self.provisioning_gate("get")?;
            Ok(self.get_worker(id)?)
        })
    }

    fn list<'a>(&'a self, filter: &'a WorkerFilter) -> ProviderFuture<'a, Vec<Worker>> {
        Box::pin(async move {
            self.latency().await;
            self.faults().count_list();
            self.provisioning_gate("list")?;
            Ok(self.list_workers(filter)?)
        })
    }
}

impl LoadBalancerApi for SimCloud {
    fn create_backend_set<'a>(&'a self, spec: &'a BackendSetSpec) -> ProviderFuture<'a, BackendSet> {
        Box::pin(async move {
            self.latency().await;
            self.faults().count_backend_set_create();
            self.faults().record(SimCall::CreateBackendSet {
                name: spec.name.clone(),
            });
            self.load_balancer_gate("create_backend_set")?;
            Ok(SimCloud::create_backend_set(self, spec)?)
        })
    }

    fn get_backend_set<'a>(&'a self, name: &'a str) -> ProviderFuture<'a, BackendSet> {
        Box::pin(async move {
            self.latency().await;
            self.load_balancer_gate("get_backend_set")?;
            Ok(SimCloud::get_backend_set(self, name)?)
        })
    }

    fn add_backend<'a>(
        &'a self,
        backend_set: &'a str,
        address: &'a BackendAddress,
    ) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            self.latency().await;
            self.faults().count_backend_add();
            self.faults().record(SimCall::AddBackend {
                backend_set: backend_set.to_string(),
                address: *address,
            });
            self.load_balancer_gate("add_backend")?;
            if self.faults().fail_add_backend() {
                return Err(ProviderError::Unavailable(format!(
                    "add of {address} to {backend_set} failed"
                )));
            }
            Ok(SimCloud::add_backend(self, backend_set, address)?)
        })
    }

    fn remove_backend<'a>(
        &'a self,
        backend_set: &'a str,
        address: &'a BackendAddress,
    ) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            self.latency().await;
            self.faults().count_backend_remove();
            self.faults().record(SimCall::RemoveBackend {
                backend_set: backend_set.to_string(),
                address: *address,
            });
            self.load_balancer_gate("remove_backend")?;
            if self.faults().fail_remove_backend() {
                return Err(ProviderError::Unavailable(format!(
                    "remove of {address} from {backend_set} failed"
                )));
            }
            Ok(SimCloud::remove_backend(self, backend_set, address)?)
        })
    }
}
