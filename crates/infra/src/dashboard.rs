//! Practice dashboard aggregates, computed from the read models.
//!
//! All calendar arithmetic is UTC: "today" is the UTC date of `now`, months
//! are UTC calendar months.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use serde::Serialize;

use dentaflow_core::{ClinicId, Money};
use dentaflow_invoicing::InvoiceId;
use dentaflow_patients::PatientId;
use dentaflow_scheduling::{AppointmentId, AppointmentStatus};

use crate::projections::{
    AppointmentReadModel, AppointmentsProjection, InvoiceFilter, InvoiceReadModel, InvoicesProjection,
    PatientReadModel, PatientsProjection,
};
use crate::read_model::ClinicStore;

pub const UPCOMING_LIMIT: usize = 5;
pub const ACTIVITY_LIMIT: usize = 5;
const ACTIVITY_PER_KIND: usize = 3;
pub const CHART_MONTHS: u32 = 6;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardStats {
    pub total_patients: usize,
    pub today_appointments: usize,
    pub completed_today: usize,
    pub remaining_today: usize,
    pub total_revenue: Money,
    pub revenue_this_month: Money,
    pub revenue_last_month: Money,
    /// 100 when nothing was collected last month.
    pub revenue_change_percent: f64,
    pub pending_invoices: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpcomingAppointment {
    pub appointment_id: AppointmentId,
    pub patient_id: PatientId,
    pub patient_name: String,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: u32,
    pub appointment_type: String,
    pub status: AppointmentStatus,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Completed,
    Invoice,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityEntry {
    /// `apt-{appointment id}` or `pay-{payment id}`.
    pub id: String,
    pub patient: String,
    pub action: ActivityKind,
    pub description: String,
    pub at: DateTime<Utc>,
}

/// One bar of a monthly chart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthlyPoint {
    /// Short month name, e.g. `Jan`.
    pub label: String,
    pub month_start: NaiveDate,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusCount {
    pub status: AppointmentStatus,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardSummary {
    pub stats: DashboardStats,
    pub upcoming: Vec<UpcomingAppointment>,
    pub recent_activity: Vec<ActivityEntry>,
    pub revenue_chart: Vec<MonthlyPoint>,
    pub status_distribution: Vec<StatusCount>,
    pub patient_growth: Vec<MonthlyPoint>,
}

/// Read-only view over the projections a dashboard needs.
pub struct Dashboard<'a, P, A, I>
where
    P: ClinicStore<PatientId, PatientReadModel>,
    A: ClinicStore<AppointmentId, AppointmentReadModel>,
    I: ClinicStore<InvoiceId, InvoiceReadModel>,
{
    patients: &'a PatientsProjection<P>,
    appointments: &'a AppointmentsProjection<A>,
    invoices: &'a InvoicesProjection<I>,
}

fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

fn month_bounds(start: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let next = start.checked_add_months(Months::new(1)).unwrap_or(NaiveDate::MAX);
    (start.and_time(chrono::NaiveTime::MIN).and_utc(), next.and_time(chrono::NaiveTime::MIN).and_utc())
}

/// First days of the last `count` months ending with the month of `now`.
fn trailing_months(now: DateTime<Utc>, count: u32) -> Vec<NaiveDate> {
    let current = month_start(now.date_naive());
    (0..count)
        .rev()
        .filter_map(|back| current.checked_sub_months(Months::new(back)))
        .collect()
}

fn revenue_change_percent(this_month: Money, last_month: Money) -> f64 {
    if last_month.is_zero() {
        return 100.0;
    }
    let this = this_month.minor() as f64;
    let last = last_month.minor() as f64;
    (this - last) / last * 100.0
}

impl<'a, P, A, I> Dashboard<'a, P, A, I>
where
    P: ClinicStore<PatientId, PatientReadModel>,
    A: ClinicStore<AppointmentId, AppointmentReadModel>,
    I: ClinicStore<InvoiceId, InvoiceReadModel>,
{
    pub fn new(
        patients: &'a PatientsProjection<P>,
        appointments: &'a AppointmentsProjection<A>,
        invoices: &'a InvoicesProjection<I>,
    ) -> Self {
        Self {
            patients,
            appointments,
            invoices,
        }
    }

    fn patient_name(&self, clinic_id: ClinicId, patient_id: &PatientId) -> String {
        self.patients
            .get(clinic_id, patient_id)
            .map(|p| p.details.full_name())
            .unwrap_or_else(|| "Unknown patient".to_string())
    }

    fn revenue_between(&self, clinic_id: ClinicId, from: DateTime<Utc>, until: DateTime<Utc>) -> Money {
        Money::saturating_sum(
            self.invoices
                .payments(clinic_id)
                .iter()
                .filter(|p| p.payment.paid_at >= from && p.payment.paid_at < until)
                .map(|p| p.payment.amount),
        )
    }

    pub fn stats(&self, clinic_id: ClinicId, now: DateTime<Utc>) -> DashboardStats {
        let today = self
            .appointments
            .by_day(clinic_id, now.date_naive(), Default::default());
        let completed_today = today
            .iter()
            .filter(|a| a.status == AppointmentStatus::Completed)
            .count();

        let this_month = month_start(now.date_naive());
        let last_month = this_month.checked_sub_months(Months::new(1)).unwrap_or(this_month);
        let (this_from, this_until) = month_bounds(this_month);
        let (last_from, last_until) = month_bounds(last_month);
        let revenue_this_month = self.revenue_between(clinic_id, this_from, this_until);
        let revenue_last_month = self.revenue_between(clinic_id, last_from, last_until);

        let total_revenue = Money::saturating_sum(
            self.invoices
                .payments(clinic_id)
                .iter()
                .map(|p| p.payment.amount),
        );
        let pending_invoices = self
            .invoices
            .list(clinic_id, InvoiceFilter::default())
            .iter()
            .filter(|i| i.status.is_outstanding())
            .count();

        DashboardStats {
            total_patients: self.patients.count(clinic_id),
            today_appointments: today.len(),
            completed_today,
            remaining_today: today.len() - completed_today,
            total_revenue,
            revenue_this_month,
            revenue_last_month,
            revenue_change_percent: revenue_change_percent(revenue_this_month, revenue_last_month),
            pending_invoices,
        }
    }

    /// Not-yet-seen appointments from the start of today, soonest first.
    pub fn upcoming(&self, clinic_id: ClinicId, now: DateTime<Utc>) -> Vec<UpcomingAppointment> {
        let start_of_today = now.date_naive().and_time(chrono::NaiveTime::MIN).and_utc();
        self.appointments
            .list(clinic_id)
            .into_iter()
            .filter(|a| a.scheduled_at >= start_of_today)
            .filter(|a| a.status.is_upcoming() || a.status == AppointmentStatus::Seated)
            .take(UPCOMING_LIMIT)
            .map(|a| UpcomingAppointment {
                patient_name: self.patient_name(clinic_id, &a.patient_id),
                appointment_id: a.appointment_id,
                patient_id: a.patient_id,
                scheduled_at: a.scheduled_at,
                duration_minutes: a.duration_minutes,
                appointment_type: a.appointment_type,
                status: a.status,
            })
            .collect()
    }

    /// Latest completed visits and payments, newest first.
    pub fn recent_activity(&self, clinic_id: ClinicId) -> Vec<ActivityEntry> {
        let mut completed: Vec<_> = self
            .appointments
            .list(clinic_id)
            .into_iter()
            .filter(|a| a.status == AppointmentStatus::Completed)
            .collect();
        completed.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        let mut activity: Vec<ActivityEntry> = completed
            .into_iter()
            .take(ACTIVITY_PER_KIND)
            .map(|a| ActivityEntry {
                id: format!("apt-{}", a.appointment_id),
                patient: self.patient_name(clinic_id, &a.patient_id),
                action: ActivityKind::Completed,
                description: a.appointment_type,
                at: a.updated_at,
            })
            .collect();

        activity.extend(
            self.invoices
                .payments(clinic_id)
                .into_iter()
                .take(ACTIVITY_PER_KIND)
                .map(|p| ActivityEntry {
                    id: format!("pay-{}", p.payment.payment_id),
                    patient: self.patient_name(clinic_id, &p.patient_id),
                    action: ActivityKind::Invoice,
                    description: "Payment Received".to_string(),
                    at: p.payment.paid_at,
                }),
        );

        activity.sort_by(|a, b| b.at.cmp(&a.at));
        activity.truncate(ACTIVITY_LIMIT);
        activity
    }

    /// Collected revenue per month (minor units), oldest month first.
    pub fn revenue_chart(&self, clinic_id: ClinicId, now: DateTime<Utc>) -> Vec<MonthlyPoint> {
        trailing_months(now, CHART_MONTHS)
            .into_iter()
            .map(|start| {
                let (from, until) = month_bounds(start);
                MonthlyPoint {
                    label: start.format("%b").to_string(),
                    month_start: start,
                    value: self.revenue_between(clinic_id, from, until).minor(),
                }
            })
            .collect()
    }

    /// Registrations per month, oldest month first.
    pub fn patient_growth(&self, clinic_id: ClinicId, now: DateTime<Utc>) -> Vec<MonthlyPoint> {
        let registrations = self.patients.registrations(clinic_id);
        trailing_months(now, CHART_MONTHS)
            .into_iter()
            .map(|start| {
                let (from, until) = month_bounds(start);
                let count = registrations.iter().filter(|at| **at >= from && **at < until).count();
                MonthlyPoint {
                    label: start.format("%b").to_string(),
                    month_start: start,
                    value: count as u64,
                }
            })
            .collect()
    }

    /// Appointment counts per status, statuses without appointments omitted.
    pub fn status_distribution(&self, clinic_id: ClinicId) -> Vec<StatusCount> {
        let mut counts: BTreeMap<AppointmentStatus, usize> = BTreeMap::new();
        for a in self.appointments.list(clinic_id) {
            *counts.entry(a.status).or_default() += 1;
        }
        counts
            .into_iter()
            .map(|(status, count)| StatusCount { status, count })
            .collect()
    }

    pub fn summary(&self, clinic_id: ClinicId, now: DateTime<Utc>) -> DashboardSummary {
        DashboardSummary {
            stats: self.stats(clinic_id, now),
            upcoming: self.upcoming(clinic_id, now),
            recent_activity: self.recent_activity(clinic_id),
            revenue_chart: self.revenue_chart(clinic_id, now),
            status_distribution: self.status_distribution(clinic_id),
            patient_growth: self.patient_growth(clinic_id, now),
        }
    }
}
